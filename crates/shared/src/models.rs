//! 订单聚合模型
//!
//! Kafka 消息、数据库行与 HTTP 响应共用同一套结构。字段级约束通过
//! validator derive 声明，跨字段的聚合一致性由 `validate_aggregate` 检查。

use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency pattern is valid"));

/// 订单聚合根
///
/// `order_uid` 全局唯一，也是缓存键。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_aggregate", skip_on_field_errors = false))]
pub struct Order {
    #[validate(length(min = 10, max = 50, message = "order_uid 长度必须在10-50之间"))]
    pub order_uid: String,

    #[validate(
        length(min = 1, max = 50, message = "track_number 不能为空且不超过50字符"),
        custom(function = "validate_alphanumeric")
    )]
    pub track_number: String,

    #[validate(length(min = 1, max = 10, message = "entry 不能为空且不超过10字符"))]
    pub entry: String,

    #[validate(nested)]
    pub delivery: Delivery,

    #[validate(nested)]
    pub payment: Payment,

    #[validate(length(min = 1, max = 100, message = "items 数量必须在1-100之间"), nested)]
    pub items: Vec<Item>,

    #[validate(length(equal = 2, message = "locale 必须是2个字符"))]
    pub locale: String,

    #[serde(default)]
    #[validate(length(max = 255))]
    pub internal_signature: String,

    #[serde(default)]
    #[validate(length(max = 50))]
    pub customer_id: String,

    #[serde(default)]
    #[validate(length(max = 50))]
    pub delivery_service: String,

    #[serde(default)]
    #[validate(length(max = 10))]
    pub shardkey: String,

    #[validate(range(min = 0, max = 999, message = "sm_id 必须在0-999之间"))]
    pub sm_id: i32,

    /// 反序列化时截断到微秒，与 TIMESTAMPTZ 精度一致
    #[serde(deserialize_with = "deserialize_store_precision")]
    pub date_created: DateTime<Utc>,

    #[serde(default)]
    #[validate(length(max = 10))]
    pub oof_shard: String,
}

/// 配送信息，存储时以所属订单的 order_uid 为主键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
pub struct Delivery {
    #[validate(length(min = 1, max = 100, message = "收件人不能为空且不超过100字符"))]
    pub name: String,

    #[validate(length(min = 1, max = 20))]
    pub phone: String,

    #[validate(length(min = 1, max = 20))]
    pub zip: String,

    #[validate(length(min = 1, max = 50))]
    pub city: String,

    #[validate(length(min = 1, max = 100))]
    pub address: String,

    #[validate(length(min = 1, max = 50))]
    pub region: String,

    #[validate(email(message = "email 格式不正确"), length(max = 100))]
    pub email: String,
}

/// 支付信息，`transaction` 即订单号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
pub struct Payment {
    #[validate(length(min = 10, max = 50))]
    pub transaction: String,

    #[serde(default)]
    #[validate(length(max = 50))]
    pub request_id: String,

    #[validate(regex(path = *CURRENCY_RE, message = "currency 必须是 ISO 4217 三位大写代码"))]
    pub currency: String,

    #[validate(length(min = 1, max = 50))]
    pub provider: String,

    #[validate(range(min = 0, max = 10_000_000, message = "amount 必须在0-10000000之间"))]
    pub amount: i32,

    #[validate(range(min = 0))]
    pub payment_dt: i64,

    #[validate(length(min = 1, max = 50))]
    pub bank: String,

    #[validate(range(min = 0, max = 1_000_000))]
    pub delivery_cost: i32,

    #[validate(range(min = 0, max = 1_000_000))]
    pub goods_total: i32,

    #[serde(default)]
    #[validate(range(min = 0, max = 1_000_000))]
    pub custom_fee: i32,
}

/// 订单商品，通过 `track_number` 关联订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
pub struct Item {
    #[validate(range(min = 1))]
    pub chrt_id: i64,

    #[validate(length(min = 1, max = 50), custom(function = "validate_alphanumeric"))]
    pub track_number: String,

    #[validate(range(min = 0, max = 1_000_000))]
    pub price: i32,

    #[validate(length(min = 1, max = 50))]
    pub rid: String,

    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(range(min = 0, max = 100))]
    pub sale: i32,

    #[serde(default)]
    #[validate(length(max = 10))]
    pub size: String,

    #[validate(range(min = 0, max = 1_000_000))]
    pub total_price: i32,

    #[validate(range(min = 1))]
    pub nm_id: i64,

    #[serde(default)]
    #[validate(length(max = 100))]
    pub brand: String,

    #[validate(range(min = 0, max = 999))]
    pub status: i32,
}

/// 截断到存储精度（微秒）
///
/// PostgreSQL 的 TIMESTAMPTZ 只保留微秒，截断后的订单经过数据库往返仍逐字段相等。
pub fn to_store_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

fn deserialize_store_precision<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer).map(to_store_precision)
}

fn validate_alphanumeric(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(char::is_alphanumeric) {
        Ok(())
    } else {
        Err(ValidationError::new("alphanumeric").with_message(Cow::Borrowed("只能包含字母和数字")))
    }
}

/// 聚合一致性：支付流水号与订单号一致，所有商品归属本订单的 track_number
fn validate_aggregate(order: &Order) -> Result<(), ValidationError> {
    if order.payment.transaction != order.order_uid {
        return Err(ValidationError::new("transaction_mismatch")
            .with_message(Cow::Borrowed("payment.transaction 必须等于 order_uid")));
    }
    if order
        .items
        .iter()
        .any(|item| item.track_number != order.track_number)
    {
        return Err(ValidationError::new("track_number_mismatch")
            .with_message(Cow::Borrowed("items 的 track_number 必须等于订单 track_number")));
    }
    Ok(())
}

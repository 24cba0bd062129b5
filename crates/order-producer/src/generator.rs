//! 随机订单生成
//!
//! 生成的订单满足全部校验规则；按配置的比例随机破坏其中一个字段，
//! 使消费端的校验失败路径也能被覆盖。

use chrono::{DateTime, Utc};
use fake::Fake;
use fake::faker::address::en::{BuildingNumber, CityName, StateName, StreetName, ZipCode};
use fake::faker::company::en::{CatchPhrase, CompanyName};
use fake::faker::internet::en::{SafeEmail, Username};
use fake::faker::name::en::Name;
use order_shared::models::{Delivery, Item, Order, Payment, to_store_precision};
use rand::Rng;
use rand::seq::IndexedRandom;
use uuid::Uuid;

const CURRENCIES: &[&str] = &["USD", "EUR", "RUB"];
const BANKS: &[&str] = &["alpha", "sber", "tinkoff", "vtb"];
const PROVIDERS: &[&str] = &["wbpay", "stripe", "paypal"];
const DELIVERY_SERVICES: &[&str] = &["meest", "cdek", "dhl"];
const LOCALES: &[&str] = &["en", "ru"];

/// 单字段破坏方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    ShortUid,
    BadTrackNumber,
    BadEmail,
    LongLocale,
    BadCurrency,
    EmptyItems,
    EmptyDeliveryName,
    NegativeAmount,
    SmIdOutOfRange,
}

impl Corruption {
    pub const ALL: [Corruption; 9] = [
        Self::ShortUid,
        Self::BadTrackNumber,
        Self::BadEmail,
        Self::LongLocale,
        Self::BadCurrency,
        Self::EmptyItems,
        Self::EmptyDeliveryName,
        Self::NegativeAmount,
        Self::SmIdOutOfRange,
    ];

    pub fn apply(self, order: &mut Order) {
        match self {
            Self::ShortUid => order.order_uid = "short".to_string(),
            Self::BadTrackNumber => order.track_number = "invalid!".to_string(),
            Self::BadEmail => order.delivery.email = "invalid-email".to_string(),
            Self::LongLocale => order.locale = "english".to_string(),
            Self::BadCurrency => order.payment.currency = "INVALID".to_string(),
            Self::EmptyItems => order.items.clear(),
            Self::EmptyDeliveryName => order.delivery.name.clear(),
            Self::NegativeAmount => order.payment.amount = -100,
            Self::SmIdOutOfRange => order.sm_id = 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortUid => "short_uid",
            Self::BadTrackNumber => "bad_track_number",
            Self::BadEmail => "bad_email",
            Self::LongLocale => "long_locale",
            Self::BadCurrency => "bad_currency",
            Self::EmptyItems => "empty_items",
            Self::EmptyDeliveryName => "empty_delivery_name",
            Self::NegativeAmount => "negative_amount",
            Self::SmIdOutOfRange => "sm_id_out_of_range",
        }
    }
}

/// 一次生成的结果
#[derive(Debug, Clone)]
pub struct Generated {
    pub order: Order,
    /// 非空表示该订单被故意破坏
    pub corruption: Option<Corruption>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderGenerator {
    invalid_percent: u8,
}

impl OrderGenerator {
    pub fn new(invalid_percent: u8) -> Self {
        Self {
            invalid_percent: invalid_percent.min(100),
        }
    }

    pub fn generate(&self) -> Generated {
        let mut rng = rand::rng();
        let mut order = random_order(&mut rng);

        let corruption = if rng.random_range(0..100) < self.invalid_percent {
            let corruption = Corruption::ALL[rng.random_range(0..Corruption::ALL.len())];
            corruption.apply(&mut order);
            Some(corruption)
        } else {
            None
        };

        Generated { order, corruption }
    }
}

fn pick<R: Rng>(rng: &mut R, values: &[&str]) -> String {
    values.choose(rng).copied().unwrap_or_default().to_string()
}

/// 按字符截断到最大长度
fn clip(value: String, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value,
    }
}

fn random_item<R: Rng>(rng: &mut R, track_number: &str) -> Item {
    let price = rng.random_range(100..=100_000);
    let sale = rng.random_range(0..=90);

    Item {
        chrt_id: rng.random_range(1_000_000..10_000_000),
        track_number: track_number.to_string(),
        price,
        rid: Uuid::new_v4().simple().to_string(),
        name: clip(CatchPhrase().fake(), 100),
        sale,
        size: rng.random_range(0..=5).to_string(),
        total_price: price * (100 - sale) / 100,
        nm_id: rng.random_range(1_000_000..10_000_000),
        brand: clip(CompanyName().fake(), 100),
        status: 202,
    }
}

/// 生成一个满足全部校验规则的随机订单
pub fn random_order<R: Rng>(rng: &mut R) -> Order {
    let order_uid = Uuid::new_v4().simple().to_string();
    let track_number = format!("WBILM{:010}", rng.random_range(0..10_000_000_000u64));
    let date_created: DateTime<Utc> = to_store_precision(Utc::now());

    let items: Vec<Item> = (0..rng.random_range(1..=5))
        .map(|_| random_item(rng, &track_number))
        .collect();
    let goods_total: i32 = items.iter().map(|item| item.total_price).sum();
    let delivery_cost = rng.random_range(0..=2000);

    let street: String = StreetName().fake();
    let building: String = BuildingNumber().fake();

    Order {
        order_uid: order_uid.clone(),
        track_number: track_number.clone(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: clip(Name().fake(), 100),
            phone: format!("+7{}", rng.random_range(9_000_000_000u64..10_000_000_000)),
            zip: clip(ZipCode().fake(), 20),
            city: clip(CityName().fake(), 50),
            address: clip(format!("{building} {street}"), 100),
            region: clip(StateName().fake(), 50),
            email: clip(SafeEmail().fake(), 100),
        },
        payment: Payment {
            transaction: order_uid,
            request_id: String::new(),
            currency: pick(rng, CURRENCIES),
            provider: pick(rng, PROVIDERS),
            amount: goods_total + delivery_cost,
            payment_dt: date_created.timestamp(),
            bank: pick(rng, BANKS),
            delivery_cost,
            goods_total,
            custom_fee: 0,
        },
        items,
        locale: pick(rng, LOCALES),
        internal_signature: String::new(),
        customer_id: clip(Username().fake(), 50),
        delivery_service: pick(rng, DELIVERY_SERVICES),
        shardkey: rng.random_range(0..10).to_string(),
        sm_id: rng.random_range(0..=999),
        date_created,
        oof_shard: rng.random_range(0..3).to_string(),
    }
}

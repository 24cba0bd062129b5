//! 订单仓储 PostgreSQL 实现
//!
//! 一个订单聚合分布在四张表中：orders、deliveries、payments、items。
//! 写入在单个事务内完成，读取时分别查询后组装。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use order_shared::error::{OrderError, Result};
use order_shared::models::{Delivery, Item, Order, Payment};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::traits::OrderRepositoryTrait;

/// 批量读取时的并发度
const FETCH_CONCURRENCY: usize = 10;

/// orders 主键约束名，用于识别重复订单
const ORDERS_PKEY: &str = "orders_pkey";

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

impl OrderRow {
    fn into_order(self, delivery: Delivery, payment: Payment, items: Vec<Item>) -> Order {
        Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery,
            payment,
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        }
    }
}

/// 订单仓储
///
/// 写入通过仓储级互斥锁串行化；读取直接使用连接池。
pub struct PgOrderRepository {
    pool: PgPool,
    write_lock: Mutex<()>,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    // ==================== 写入操作 ====================

    async fn insert_aggregate(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
        // 1. 订单主表
        sqlx::query(
            r#"
            INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature,
                                customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_insert_error(e, &order.order_uid))?;

        // 2. 配送信息，以订单号为主键
        let d = &order.delivery;
        sqlx::query(
            r#"
            INSERT INTO deliveries (order_uid, name, phone, zip, city, address, region, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&order.order_uid)
        .bind(&d.name)
        .bind(&d.phone)
        .bind(&d.zip)
        .bind(&d.city)
        .bind(&d.address)
        .bind(&d.region)
        .bind(&d.email)
        .execute(&mut **tx)
        .await?;

        // 3. 支付信息
        let p = &order.payment;
        sqlx::query(
            r#"
            INSERT INTO payments (transaction, request_id, currency, provider, amount, payment_dt,
                                  bank, delivery_cost, goods_total, custom_fee)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&p.transaction)
        .bind(&p.request_id)
        .bind(&p.currency)
        .bind(&p.provider)
        .bind(p.amount)
        .bind(p.payment_dt)
        .bind(&p.bank)
        .bind(p.delivery_cost)
        .bind(p.goods_total)
        .bind(p.custom_fee)
        .execute(&mut **tx)
        .await?;

        // 4. 商品明细
        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO items (chrt_id, track_number, price, rid, name, sale, size,
                                   total_price, nm_id, brand, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(item.chrt_id)
            .bind(&item.track_number)
            .bind(item.price)
            .bind(&item.rid)
            .bind(&item.name)
            .bind(item.sale)
            .bind(&item.size)
            .bind(item.total_price)
            .bind(item.nm_id)
            .bind(&item.brand)
            .bind(item.status)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    // ==================== 查询操作 ====================

    async fn fetch_order_row(&self, order_uid: &str) -> Result<Option<OrderRow>> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_uid, track_number, entry, locale, internal_signature, customer_id,
                   delivery_service, shardkey, sm_id, date_created, oof_shard
            FROM orders
            WHERE order_uid = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn fetch_delivery(&self, order_uid: &str) -> Result<Delivery> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT name, phone, zip, city, address, region, email
            FROM deliveries
            WHERE order_uid = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| partial(order_uid, "delivery", e.to_string()))?;

        delivery.ok_or_else(|| partial(order_uid, "delivery", "row missing".to_string()))
    }

    async fn fetch_payment(&self, order_uid: &str) -> Result<Payment> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT transaction, request_id, currency, provider, amount, payment_dt,
                   bank, delivery_cost, goods_total, custom_fee
            FROM payments
            WHERE transaction = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| partial(order_uid, "payment", e.to_string()))?;

        payment.ok_or_else(|| partial(order_uid, "payment", "row missing".to_string()))
    }

    async fn fetch_items(&self, order_uid: &str, track_number: &str) -> Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT chrt_id, track_number, price, rid, name, sale, size,
                   total_price, nm_id, brand, status
            FROM items
            WHERE track_number = $1
            ORDER BY id
            "#,
        )
        .bind(track_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| partial(order_uid, "items", e.to_string()))?;

        if items.is_empty() {
            return Err(partial(order_uid, "items", "no rows".to_string()));
        }
        Ok(items)
    }

    async fn list_order_uids(&self) -> Result<Vec<String>> {
        let uids = sqlx::query_scalar::<_, String>(
            "SELECT order_uid FROM orders ORDER BY date_created DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(uids)
    }
}

#[async_trait]
impl OrderRepositoryTrait for PgOrderRepository {
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    async fn create(&self, order: &Order) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // 事务保证四表一致性，任一步失败时 tx 在 drop 时回滚
        let mut tx = self.pool.begin().await?;
        Self::insert_aggregate(&mut tx, order).await?;
        tx.commit().await?;

        debug!(items = order.items.len(), "订单已持久化");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_uid: &str) -> Result<Order> {
        let row = self
            .fetch_order_row(order_uid)
            .await?
            .ok_or_else(|| OrderError::NotFound {
                order_uid: order_uid.to_string(),
            })?;

        let delivery = self.fetch_delivery(order_uid).await?;
        let payment = self.fetch_payment(order_uid).await?;
        let items = self.fetch_items(order_uid, &row.track_number).await?;

        Ok(row.into_order(delivery, payment, items))
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<Order>> {
        let uids = self.list_order_uids().await?;
        let total = uids.len();

        // buffered 保持 uid 的顺序，即创建时间倒序
        let orders: Vec<Order> = stream::iter(uids)
            .map(|uid| async move {
                match self.get_order(&uid).await {
                    Ok(order) => Some(order),
                    Err(e) => {
                        warn!(order_uid = %uid, error = %e, "读取订单失败，跳过");
                        None
                    }
                }
            })
            .buffered(FETCH_CONCURRENCY)
            .filter_map(|order| async move { order })
            .collect()
            .await;

        info!(total, loaded = orders.len(), "批量读取订单完成");
        Ok(orders)
    }
}

fn partial(order_uid: &str, part: &'static str, reason: String) -> OrderError {
    OrderError::PartialData {
        order_uid: order_uid.to_string(),
        part,
        reason,
    }
}

/// 订单主键冲突映射为 `AlreadyExists`，其余保持数据库错误
fn map_insert_error(err: sqlx::Error, order_uid: &str) -> OrderError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
        && db_err.constraint() == Some(ORDERS_PKEY)
    {
        return OrderError::AlreadyExists {
            order_uid: order_uid.to_string(),
        };
    }
    OrderError::Database(err)
}

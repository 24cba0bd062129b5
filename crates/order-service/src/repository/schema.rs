//! 建表
//!
//! 启动时按配置在单个事务内执行，全部语句幂等。

use order_shared::error::Result;
use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_uid          VARCHAR(50)  PRIMARY KEY,
        track_number       VARCHAR(50)  NOT NULL UNIQUE,
        entry              VARCHAR(10)  NOT NULL,
        locale             VARCHAR(2)   NOT NULL,
        internal_signature VARCHAR(255) NOT NULL DEFAULT '',
        customer_id        VARCHAR(50)  NOT NULL DEFAULT '',
        delivery_service   VARCHAR(50)  NOT NULL DEFAULT '',
        shardkey           VARCHAR(10)  NOT NULL DEFAULT '',
        sm_id              INTEGER      NOT NULL,
        date_created       TIMESTAMPTZ  NOT NULL,
        oof_shard          VARCHAR(10)  NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_date_created ON orders (date_created DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS deliveries (
        order_uid VARCHAR(50)  PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
        name      VARCHAR(100) NOT NULL,
        phone     VARCHAR(20)  NOT NULL,
        zip       VARCHAR(20)  NOT NULL,
        city      VARCHAR(50)  NOT NULL,
        address   VARCHAR(100) NOT NULL,
        region    VARCHAR(50)  NOT NULL,
        email     VARCHAR(100) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        transaction   VARCHAR(50) PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
        request_id    VARCHAR(50) NOT NULL DEFAULT '',
        currency      VARCHAR(3)  NOT NULL,
        provider      VARCHAR(50) NOT NULL,
        amount        INTEGER     NOT NULL,
        payment_dt    BIGINT      NOT NULL,
        bank          VARCHAR(50) NOT NULL,
        delivery_cost INTEGER     NOT NULL,
        goods_total   INTEGER     NOT NULL,
        custom_fee    INTEGER     NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id           SERIAL       PRIMARY KEY,
        chrt_id      BIGINT       NOT NULL,
        track_number VARCHAR(50)  NOT NULL REFERENCES orders (track_number) ON DELETE CASCADE,
        price        INTEGER      NOT NULL,
        rid          VARCHAR(50)  NOT NULL,
        name         VARCHAR(100) NOT NULL,
        sale         INTEGER      NOT NULL,
        size         VARCHAR(10)  NOT NULL DEFAULT '',
        total_price  INTEGER      NOT NULL,
        nm_id        BIGINT       NOT NULL,
        brand        VARCHAR(100) NOT NULL DEFAULT '',
        status       INTEGER      NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_track_number ON items (track_number)",
];

/// 创建订单相关表与索引
pub async fn create_tables(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(statements = STATEMENTS.len(), "数据库表结构已就绪");
    Ok(())
}

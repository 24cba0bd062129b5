//! 订单服务
//!
//! 从 Kafka 摄取订单，校验后写入 PostgreSQL，并通过带 TTL 的内存缓存
//! 对外提供按订单号查询的 HTTP 接口。

pub mod cache;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod repository;
pub mod routes;
pub mod service;
pub mod source;
pub mod state;
pub mod validation;

pub use cache::{InMemoryOrderCache, OrderCache};
pub use consumer::{IngestionConsumer, ProcessOutcome};
pub use service::{OrderCreator, OrderReader, OrderService};

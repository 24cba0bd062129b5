//! 共享库
//!
//! 包含订单服务与订单生产者共用的配置、错误处理、数据模型、数据库连接、
//! Kafka、重试策略、优雅关闭与可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod kafka;
pub mod models;
pub mod observability;
pub mod retry;
pub mod shutdown;
pub mod test_utils;

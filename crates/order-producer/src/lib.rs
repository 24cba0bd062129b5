//! 模拟订单生产者
//!
//! 按固定间隔生成随机订单并发布到 Kafka，按比例注入非法订单，
//! 用于驱动订单服务的摄取与校验链路。

pub mod cli;
pub mod generator;
pub mod sender;

//! 命令行参数
//!
//! 未显式指定的参数取自配置文件（`producer` 与 `kafka` 段）。

use clap::Parser;
use order_shared::config::AppConfig;

/// 模拟订单生产者
#[derive(Parser, Debug)]
#[command(name = "order-producer")]
#[command(version, about = "向 Kafka 持续发送模拟订单")]
pub struct Cli {
    /// Kafka brokers 地址
    #[arg(long)]
    pub brokers: Option<String>,

    /// 目标 topic
    #[arg(long)]
    pub topic: Option<String>,

    /// 发送间隔（毫秒，至少为 1）
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: Option<u64>,

    /// 发送数量，缺省为持续发送
    #[arg(long)]
    pub count: Option<u64>,

    /// 非法订单比例（0-100）
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub invalid_percent: Option<u8>,
}

impl Cli {
    /// 命令行参数覆盖配置
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(brokers) = &self.brokers {
            config.kafka.brokers = brokers.clone();
        }
        if let Some(topic) = &self.topic {
            config.kafka.topic = topic.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.producer.interval_ms = interval_ms;
        }
        if self.count.is_some() {
            config.producer.count = self.count;
        }
        if let Some(percent) = self.invalid_percent {
            config.producer.invalid_percent = percent;
        }
    }
}

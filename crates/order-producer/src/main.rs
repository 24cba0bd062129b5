//! 模拟订单生产者入口

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use order_producer::{
    cli::Cli,
    generator::OrderGenerator,
    sender::{KafkaOrderPublisher, OrderSender},
};
use order_shared::{
    config::AppConfig,
    kafka::KafkaProducer,
    observability,
    shutdown::shutdown_signal,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load("order-producer").context("加载配置失败")?;
    cli.apply(&mut config);
    // 生产者不暴露指标端口，避免与订单服务冲突
    config.observability.metrics_enabled = false;
    let _guard = observability::init(&config.observability).await?;

    let producer = KafkaProducer::new(&config.kafka).context("创建 Kafka 生产者失败")?;
    let publisher = Arc::new(KafkaOrderPublisher::new(producer, &config.kafka.topic));

    let sender = OrderSender::new(
        publisher.clone(),
        OrderGenerator::new(config.producer.invalid_percent),
        config.producer.interval(),
        config.producer.count,
    );

    // 收到 Ctrl+C / SIGTERM 后通知发送循环在下一个 tick 前退出
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_tx.send_replace(true);
    });

    let stats = sender.run(shutdown_rx).await;

    info!(
        sent = stats.sent,
        invalid = stats.invalid,
        failed = stats.failed,
        "发送完成"
    );
    if let Err(e) = publisher.flush(Duration::from_secs(5)) {
        warn!(error = %e, "flush 在途消息失败");
    }

    Ok(())
}

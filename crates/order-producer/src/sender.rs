//! 订单发送循环

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use order_shared::error::OrderError;
use order_shared::kafka::KafkaProducer;
use order_shared::models::Order;
use order_shared::shutdown::cancelled;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::generator::OrderGenerator;

/// 订单发布目标
#[async_trait]
pub trait OrderPublisher: Send + Sync {
    async fn publish(&self, order: &Order) -> Result<(), OrderError>;
}

/// 发布到 Kafka topic，以 order_uid 作为消息 key
pub struct KafkaOrderPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaOrderPublisher {
    pub fn new(producer: KafkaProducer, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
        }
    }

    pub fn flush(&self, timeout: Duration) -> Result<(), OrderError> {
        self.producer.flush(timeout)
    }
}

#[async_trait]
impl OrderPublisher for KafkaOrderPublisher {
    async fn publish(&self, order: &Order) -> Result<(), OrderError> {
        let (partition, offset) = self
            .producer
            .send_json(&self.topic, &order.order_uid, order)
            .await?;

        info!(
            order_uid = %order.order_uid,
            topic = %self.topic,
            partition,
            offset,
            "订单已发送"
        );
        Ok(())
    }
}

/// 发送统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendStats {
    pub sent: u64,
    /// 其中故意破坏的订单数
    pub invalid: u64,
    pub failed: u64,
}

impl SendStats {
    pub fn attempted(&self) -> u64 {
        self.sent + self.failed
    }
}

pub struct OrderSender<P: OrderPublisher> {
    publisher: Arc<P>,
    generator: OrderGenerator,
    interval: Duration,
    count: Option<u64>,
}

impl<P: OrderPublisher> OrderSender<P> {
    pub fn new(
        publisher: Arc<P>,
        generator: OrderGenerator,
        interval: Duration,
        count: Option<u64>,
    ) -> Self {
        Self {
            publisher,
            generator,
            // tokio interval 不接受零周期
            interval: interval.max(Duration::from_millis(1)),
            count,
        }
    }

    /// 按间隔发送，直到收到关闭信号或达到数量上限
    ///
    /// 单条发送失败只记录日志，循环继续。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SendStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = SendStats::default();

        info!(
            interval_ms = self.interval.as_millis() as u64,
            count = ?self.count,
            "订单发送循环已启动"
        );

        loop {
            if self.count.is_some_and(|limit| stats.attempted() >= limit) {
                info!("已达到发送数量上限");
                break;
            }

            tokio::select! {
                biased;

                _ = cancelled(&mut shutdown) => {
                    info!("收到关闭信号，停止发送");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let generated = self.generator.generate();
            if let Some(corruption) = generated.corruption {
                warn!(
                    order_uid = %generated.order.order_uid,
                    corruption = corruption.as_str(),
                    "发送非法订单"
                );
            }

            match self.publisher.publish(&generated.order).await {
                Ok(()) => {
                    stats.sent += 1;
                    if generated.corruption.is_some() {
                        stats.invalid += 1;
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        order_uid = %generated.order.order_uid,
                        error = %e,
                        "订单发送失败"
                    );
                }
            }
        }

        info!(?stats, "订单发送循环已退出");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Order>>,
        failures: Mutex<VecDeque<OrderError>>,
    }

    #[async_trait]
    impl OrderPublisher for RecordingPublisher {
        async fn publish(&self, order: &Order) -> Result<(), OrderError> {
            if let Some(err) = self.failures.lock().pop_front() {
                return Err(err);
            }
            self.published.lock().push(order.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_count() {
        let publisher = Arc::new(RecordingPublisher::default());
        let sender = OrderSender::new(
            publisher.clone(),
            OrderGenerator::new(0),
            Duration::from_secs(1),
            Some(3),
        );
        let (_tx, rx) = watch::channel(false);

        let stats = sender.run(rx).await;

        assert_eq!(stats, SendStats { sent: 3, invalid: 0, failed: 0 });
        assert_eq!(publisher.published.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let publisher = Arc::new(RecordingPublisher::default());
        let sender = OrderSender::new(
            publisher.clone(),
            OrderGenerator::new(0),
            Duration::ZERO,
            Some(2),
        );
        let (_tx, rx) = watch::channel(false);

        let stats = sender.run(rx).await;

        assert_eq!(stats.sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_and_loop_continues() {
        let publisher = Arc::new(RecordingPublisher::default());
        publisher
            .failures
            .lock()
            .push_back(OrderError::Kafka("queue full".to_string()));
        let sender = OrderSender::new(
            publisher.clone(),
            OrderGenerator::new(100),
            Duration::from_millis(10),
            Some(2),
        );
        let (_tx, rx) = watch::channel(false);

        let stats = sender.run(rx).await;

        assert_eq!(stats, SendStats { sent: 1, invalid: 1, failed: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_unbounded_loop() {
        let publisher = Arc::new(RecordingPublisher::default());
        let sender = Arc::new(OrderSender::new(
            publisher.clone(),
            OrderGenerator::new(0),
            Duration::from_secs(1),
            None,
        ));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.run(rx).await })
        };

        // 首个 tick 立即触发，之后每秒一次：0s、1s、2s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send_replace(true);
        let stats = runner.await.unwrap();

        assert_eq!(stats.sent, 3);
        let published = publisher.published.lock();
        assert!(published.iter().all(|o| o.items.iter().all(|i| i.track_number == o.track_number)));
    }
}

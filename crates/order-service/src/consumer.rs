//! 订单摄取消费者
//!
//! 每条消息依次经过：解析 → 校验 → 持久化（带分类重试）→ 提交偏移量。
//!
//! ## 提交策略
//!
//! - 持久化成功、订单已存在：提交
//! - 解析失败、校验失败：提交并跳过，永不重试
//! - 其他永久错误、重试耗尽：默认不提交；`commit_on_failure` 开启时同样提交
//!
//! 无论结果如何，消费循环都会继续处理下一条消息。Kafka 的提交是累积的，
//! 同一分区后续消息提交 `offset + 1` 时会越过未提交的失败消息，因此失败消息
//! 只有在它是分区最后一条、或关闭时正处于重试中才会被重新投递。

use std::sync::Arc;
use std::time::{Duration, Instant};

use order_shared::config::ConsumerConfig;
use order_shared::error::OrderError;
use order_shared::kafka::{ConsumerMessage, MessageSource};
use order_shared::models::Order;
use order_shared::observability::metrics::MetricsSink;
use order_shared::retry::{ErrorClass, RetryPolicy, retry_with_policy};
use order_shared::shutdown::cancelled;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::service::OrderCreator;
use crate::validation::OrderValidator;

/// 单条消息的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Persisted { attempts: u32 },
    /// 重复投递，订单已存在
    AlreadyExists,
    ParseFailed,
    ValidationFailed,
    PersistFailed {
        class: ErrorClass,
        attempts: u32,
        exhausted: bool,
    },
}

impl ProcessOutcome {
    fn should_commit(&self, commit_on_failure: bool) -> bool {
        match self {
            Self::Persisted { .. }
            | Self::AlreadyExists
            | Self::ParseFailed
            | Self::ValidationFailed => true,
            Self::PersistFailed { .. } => commit_on_failure,
        }
    }

    fn status(&self) -> &'static str {
        match self {
            Self::Persisted { .. } | Self::AlreadyExists => "success",
            _ => "error",
        }
    }
}

/// 处理结论与偏移量是否已提交
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processed {
    pub outcome: ProcessOutcome,
    pub committed: bool,
}

pub struct IngestionConsumer<S, C>
where
    S: MessageSource,
    C: OrderCreator,
{
    source: Arc<S>,
    creator: Arc<C>,
    validator: OrderValidator,
    policy: RetryPolicy,
    fetch_retry_interval: Duration,
    commit_on_failure: bool,
    topic: String,
    metrics: Arc<dyn MetricsSink>,
}

impl<S, C> IngestionConsumer<S, C>
where
    S: MessageSource,
    C: OrderCreator,
{
    pub fn new(
        source: Arc<S>,
        creator: Arc<C>,
        config: &ConsumerConfig,
        topic: &str,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            source,
            creator,
            validator: OrderValidator::new(),
            policy: config.retry_policy(),
            fetch_retry_interval: config.fetch_retry_interval(),
            commit_on_failure: config.commit_on_failure,
            topic: topic.to_string(),
            metrics,
        }
    }

    /// 消费循环，直到收到关闭信号
    ///
    /// 关闭时正在处理（包括重试退避中）的消息被放弃，其偏移量未提交，
    /// 会被重新投递。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "订单消费循环已启动");

        loop {
            let fetched = tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                _ = cancelled(&mut shutdown) => break,
                fetched = self.source.fetch() => fetched,
            };

            match fetched {
                Ok(msg) => {
                    let span = info_span!(
                        "process_message",
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                    );

                    tokio::select! {
                        biased;

                        _ = cancelled(&mut shutdown) => {
                            warn!(offset = msg.offset, "收到关闭信号，放弃处理中的消息");
                            break;
                        }
                        _ = self.process_message(&msg).instrument(span) => {}
                    }
                }
                Err(e) => {
                    self.metrics
                        .kafka_message(&self.topic, "error", "fetch_message");
                    error!(
                        error = %e,
                        retry_in_ms = self.fetch_retry_interval.as_millis() as u64,
                        "拉取消息失败"
                    );

                    tokio::select! {
                        biased;

                        _ = cancelled(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.fetch_retry_interval) => {}
                    }
                }
            }
        }

        info!("收到关闭信号，订单消费循环退出");
    }

    /// 处理单条消息并按策略提交偏移量
    pub async fn process_message(&self, msg: &ConsumerMessage) -> Processed {
        let start = Instant::now();
        self.metrics.kafka_message(&msg.topic, "received", "none");

        let outcome = self.ingest(msg).await;

        let committed = if outcome.should_commit(self.commit_on_failure) {
            self.commit(msg).await
        } else {
            warn!(
                offset = msg.offset,
                ?outcome,
                "消息处理失败，偏移量未提交"
            );
            false
        };

        self.metrics.kafka_message_duration(
            &msg.topic,
            outcome.status(),
            start.elapsed().as_secs_f64(),
        );

        Processed { outcome, committed }
    }

    async fn ingest(&self, msg: &ConsumerMessage) -> ProcessOutcome {
        let order: Order = match msg.deserialize_payload() {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "消息解析失败，跳过");
                self.metrics.kafka_message(&msg.topic, "error", "parse");
                return ProcessOutcome::ParseFailed;
            }
        };

        if let Err(failure) = self.validator.validate(&order) {
            warn!(
                order_uid = %order.order_uid,
                violations = failure.violations.len(),
                details = %failure,
                "订单校验失败，跳过"
            );
            self.metrics.kafka_message(&msg.topic, "error", "validation");
            return ProcessOutcome::ValidationFailed;
        }

        let retried = retry_with_policy(
            &self.policy,
            "persist_order",
            OrderError::is_retryable,
            || self.creator.create(&order),
        )
        .await;

        let status = if retried.result.is_ok() { "success" } else { "error" };
        self.metrics
            .kafka_processing_attempts(&msg.topic, status, retried.attempts);

        match retried.result {
            Ok(()) => {
                info!(
                    order_uid = %order.order_uid,
                    attempts = retried.attempts,
                    "订单已持久化"
                );
                self.metrics.kafka_message(&msg.topic, "success", "none");
                ProcessOutcome::Persisted {
                    attempts: retried.attempts,
                }
            }
            Err(OrderError::AlreadyExists { order_uid }) => {
                info!(order_uid = %order_uid, "订单已存在，按成功处理");
                self.metrics.kafka_message(&msg.topic, "success", "duplicate");
                ProcessOutcome::AlreadyExists
            }
            Err(e) => {
                let class = e.class();
                error!(
                    order_uid = %order.order_uid,
                    error = %e,
                    class = class.as_str(),
                    attempts = retried.attempts,
                    exhausted = retried.exhausted,
                    "订单持久化失败"
                );
                self.metrics.kafka_message(&msg.topic, "error", "processing");
                ProcessOutcome::PersistFailed {
                    class,
                    attempts: retried.attempts,
                    exhausted: retried.exhausted,
                }
            }
        }
    }

    async fn commit(&self, msg: &ConsumerMessage) -> bool {
        match self.source.commit(msg).await {
            Ok(()) => {
                debug!(offset = msg.offset, "偏移量已提交");
                true
            }
            Err(e) => {
                // 持久化已完成时提交失败会导致重复投递，由 AlreadyExists 兜底
                error!(offset = msg.offset, error = %e, "提交偏移量失败");
                self.metrics.kafka_message(&msg.topic, "error", "commit");
                false
            }
        }
    }
}

//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射与手动偏移量提交语义。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::OrderError;
use crate::shutdown::Closer;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

pub mod topics {
    pub const ORDERS: &str = "orders";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递，并在处理完成后用于提交偏移量。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 构造一条测试或回放用的消息
    pub fn new(topic: &str, partition: i32, offset: i64, key: Option<&str>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(String::from),
            payload,
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, OrderError> {
        serde_json::from_slice(&self.payload).map_err(|e| OrderError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MessageSource
// ---------------------------------------------------------------------------

/// 可拉取并手动确认的消息源
///
/// 消费循环只依赖该接口，生产环境使用 `KafkaConsumer`，测试使用脚本化的内存实现。
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// 拉取下一条消息，阻塞直到有消息或出错
    async fn fetch(&self) -> Result<ConsumerMessage, OrderError>;

    /// 提交该消息的偏移量（下一次从 offset + 1 开始消费）
    async fn commit(&self, msg: &ConsumerMessage) -> Result<(), OrderError>;
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法。
/// `acks=1`：至少 leader 确认后才返回成功。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, OrderError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "1")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| OrderError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), OrderError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| OrderError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), OrderError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| OrderError::Internal(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }

    /// 等待所有在途消息投递完成
    pub fn flush(&self, timeout: Duration) -> Result<(), OrderError> {
        use rdkafka::producer::Producer;

        self.producer
            .flush(timeout)
            .map_err(|e| OrderError::Kafka(format!("flush 失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 手动提交偏移量的 Kafka 消费者
///
/// 关闭自动提交与自动 offset store，偏移量只在调用 `commit` 时前进。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, OrderError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| OrderError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), OrderError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| OrderError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 退出消费组
    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!("已退出 Kafka 消费组");
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    async fn fetch(&self) -> Result<ConsumerMessage, OrderError> {
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e| OrderError::Kafka(format!("接收消息失败: {e}")))?;

        let msg = ConsumerMessage::from_borrowed(&borrowed);
        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "收到 Kafka 消息"
        );
        Ok(msg)
    }

    async fn commit(&self, msg: &ConsumerMessage) -> Result<(), OrderError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
            .map_err(|e| OrderError::Kafka(format!("构造提交列表失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| OrderError::Kafka(format!("提交偏移量失败: {e}")))
    }
}

#[async_trait]
impl Closer for KafkaConsumer {
    fn name(&self) -> &str {
        "kafka-consumer"
    }

    async fn close(&self) -> Result<(), OrderError> {
        self.unsubscribe();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

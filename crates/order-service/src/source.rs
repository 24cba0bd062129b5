//! 内存消息源
//!
//! 以 channel 模拟单分区的 Kafka topic：`publish` 追加消息并分配递增 offset，
//! `fetch` 按顺序取出，`commit` 记录已确认的 offset。可预置拉取或提交失败。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use order_shared::error::OrderError;
use order_shared::kafka::{ConsumerMessage, MessageSource};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

pub struct InMemorySource {
    topic: String,
    sender: mpsc::UnboundedSender<ConsumerMessage>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConsumerMessage>>,
    next_offset: AtomicI64,
    committed: Mutex<Vec<i64>>,
    fetch_failures: Mutex<VecDeque<OrderError>>,
    commit_failures: Mutex<VecDeque<OrderError>>,
}

impl InMemorySource {
    pub fn new(topic: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            topic: topic.to_string(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            next_offset: AtomicI64::new(0),
            committed: Mutex::new(Vec::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            commit_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// 追加一条原始消息，返回分配的 offset
    pub fn publish(&self, key: Option<&str>, payload: Vec<u8>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let msg = ConsumerMessage::new(&self.topic, 0, offset, key, payload);
        // 接收端与发送端同属本结构体，发送不会失败
        let _ = self.sender.send(msg);
        offset
    }

    pub fn publish_json<T: Serialize>(&self, key: &str, value: &T) -> Result<i64, OrderError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| OrderError::Internal(format!("序列化失败: {e}")))?;
        Ok(self.publish(Some(key), payload))
    }

    /// 已提交的消息 offset，按提交顺序
    pub fn committed(&self) -> Vec<i64> {
        self.committed.lock().clone()
    }

    pub fn fail_next_fetch(&self, err: OrderError) {
        self.fetch_failures.lock().push_back(err);
    }

    pub fn fail_next_commit(&self, err: OrderError) {
        self.commit_failures.lock().push_back(err);
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn fetch(&self) -> Result<ConsumerMessage, OrderError> {
        if let Some(err) = self.fetch_failures.lock().pop_front() {
            return Err(err);
        }

        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| OrderError::Kafka("message source closed".to_string()))
    }

    async fn commit(&self, msg: &ConsumerMessage) -> Result<(), OrderError> {
        if let Some(err) = self.commit_failures.lock().pop_front() {
            return Err(err);
        }
        self.committed.lock().push(msg.offset);
        Ok(())
    }
}

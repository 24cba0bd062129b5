//! 订单内存缓存
//!
//! 以 `order_uid` 为键的 TTL 缓存：
//! - `get` 会检查过期时间，已过期但尚未被清理的条目同样视为未命中
//! - `set` / `warm_up` 为每个条目设置新的过期时间 now + TTL
//! - 后台清理任务由调用方通过 [`InMemoryOrderCache::start_sweeper`] 显式启动，
//!   返回的 [`SweeperHandle`] 控制其生命周期
//!
//! 读操作之间可以并发，写操作（含清理）独占；清理按批次获取写锁，
//! 避免长时间阻塞读写。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use order_shared::error::Result;
use order_shared::models::Order;
use order_shared::observability::metrics::MetricsSink;
use order_shared::shutdown::{Closer, cancelled};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// 订单缓存接口
pub trait OrderCache: Send + Sync {
    /// 读取未过期的订单
    fn get(&self, order_uid: &str) -> Option<Order>;

    /// 写入或覆盖，过期时间重置为 now + TTL
    fn set(&self, order_uid: &str, order: Order);

    /// 删除条目；不存在时为空操作
    fn delete(&self, order_uid: &str);

    /// 批量写入，启动时预热使用
    fn warm_up(&self, orders: Vec<Order>);

    /// 当前条目数（含已过期但尚未清理的条目）
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CacheEntry {
    order: Order,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 基于 `RwLock<HashMap>` 的 TTL 缓存
pub struct InMemoryOrderCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    sweep_batch_size: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl InMemoryOrderCache {
    pub fn new(ttl: Duration, sweep_batch_size: usize, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            sweep_batch_size: sweep_batch_size.max(1),
            metrics,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 以指定的过期时间写入条目
    pub fn set_with_expiry(&self, order_uid: &str, order: Order, expires_at: Instant) {
        let size = {
            let mut entries = self.entries.write();
            entries.insert(order_uid.to_string(), CacheEntry { order, expires_at });
            entries.len()
        };
        self.metrics.set_cache_size(size);
    }

    /// 删除所有已过期条目，返回删除数量
    ///
    /// 先在读锁下收集过期键，再按批次获取写锁删除；删除前重新检查过期时间，
    /// 期间被重新 `set` 的条目不会被误删。
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for batch in expired.chunks(self.sweep_batch_size) {
            let mut entries = self.entries.write();
            for key in batch {
                if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                    entries.remove(key);
                    removed += 1;
                }
            }
        }

        let size = self.len();
        self.metrics.set_cache_size(size);
        debug!(removed, remaining = size, "已清理过期缓存");
        removed
    }

    /// 启动后台清理任务
    ///
    /// 每个周期调用一次 [`Self::sweep_expired`]。丢弃或关闭返回的句柄都会停止任务。
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(period_secs = period.as_secs_f64(), "缓存清理任务已启动");
            loop {
                tokio::select! {
                    biased;

                    _ = cancelled(&mut stop_rx) => {
                        info!("缓存清理任务已停止");
                        break;
                    }

                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }
        });

        SweeperHandle {
            stop: stop_tx,
            join: Mutex::new(Some(join)),
        }
    }
}

impl OrderCache for InMemoryOrderCache {
    fn get(&self, order_uid: &str) -> Option<Order> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .get(order_uid)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.order.clone())
    }

    fn set(&self, order_uid: &str, order: Order) {
        self.set_with_expiry(order_uid, order, Instant::now() + self.ttl);
    }

    fn delete(&self, order_uid: &str) {
        let (removed, size) = {
            let mut entries = self.entries.write();
            let removed = entries.remove(order_uid).is_some();
            (removed, entries.len())
        };

        if removed {
            self.metrics.set_cache_size(size);
        } else {
            debug!(order_uid, "缓存中不存在该订单，跳过删除");
        }
    }

    fn warm_up(&self, orders: Vec<Order>) {
        let expires_at = Instant::now() + self.ttl;
        let count = orders.len();
        let size = {
            let mut entries = self.entries.write();
            for order in orders {
                entries.insert(order.order_uid.clone(), CacheEntry { order, expires_at });
            }
            entries.len()
        };

        self.metrics.set_cache_size(size);
        info!(count, size, "缓存预热完成");
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// 后台清理任务句柄
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SweeperHandle {
    /// 通知任务停止并等待其退出
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let join = self.join.lock().take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

#[async_trait]
impl Closer for SweeperHandle {
    fn name(&self) -> &str {
        "cache-sweeper"
    }

    async fn close(&self) -> Result<()> {
        self.stop().await;
        Ok(())
    }
}

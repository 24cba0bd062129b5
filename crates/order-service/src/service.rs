//! 订单服务
//!
//! 组合仓储与缓存：
//! - 写入：持久化成功后使缓存失效，失败时不触碰缓存
//! - 读取：cache-aside，未命中时回源并回填缓存
//! - 预热：启动时批量加载全部订单

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use order_shared::error::Result;
use order_shared::models::Order;
use order_shared::observability::metrics::MetricsSink;
use tracing::{debug, info, instrument};

use crate::cache::OrderCache;
use crate::repository::OrderRepositoryTrait;

/// 订单写入能力，消费者依赖此接口
#[async_trait]
pub trait OrderCreator: Send + Sync {
    async fn create(&self, order: &Order) -> Result<()>;
}

/// 订单读取能力，HTTP 层依赖此接口
#[async_trait]
pub trait OrderReader: Send + Sync {
    async fn get_order(&self, order_uid: &str) -> Result<Order>;
}

/// 订单服务
pub struct OrderService<R, C>
where
    R: OrderRepositoryTrait,
    C: OrderCache,
{
    repo: Arc<R>,
    cache: Arc<C>,
    metrics: Arc<dyn MetricsSink>,
}

impl<R, C> OrderService<R, C>
where
    R: OrderRepositoryTrait,
    C: OrderCache,
{
    pub fn new(repo: Arc<R>, cache: Arc<C>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            repo,
            cache,
            metrics,
        }
    }

    /// 从仓储加载全部订单写入缓存，返回加载数量
    ///
    /// 仓储失败时返回错误且不修改缓存；调用方决定是否中止启动。
    #[instrument(skip(self))]
    pub async fn warm_up_cache(&self) -> Result<usize> {
        let orders = self.repo.get_all().await?;
        let count = orders.len();
        self.cache.warm_up(orders);
        info!(count, "订单缓存预热完成");
        Ok(count)
    }
}

#[async_trait]
impl<R, C> OrderCreator for OrderService<R, C>
where
    R: OrderRepositoryTrait,
    C: OrderCache,
{
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    async fn create(&self, order: &Order) -> Result<()> {
        let start = Instant::now();

        if let Err(e) = self.repo.create(order).await {
            self.metrics
                .order_processing_duration("error", start.elapsed().as_secs_f64());
            return Err(e);
        }

        self.cache.delete(&order.order_uid);
        self.metrics.order_created();
        self.metrics
            .order_processing_duration("success", start.elapsed().as_secs_f64());
        Ok(())
    }
}

#[async_trait]
impl<R, C> OrderReader for OrderService<R, C>
where
    R: OrderRepositoryTrait,
    C: OrderCache,
{
    #[instrument(skip(self))]
    async fn get_order(&self, order_uid: &str) -> Result<Order> {
        if let Some(order) = self.cache.get(order_uid) {
            debug!("缓存命中");
            return Ok(order);
        }

        let order = self.repo.get_order(order_uid).await?;
        self.cache.set(order_uid, order.clone());
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mockall::predicate::function;
    use order_shared::error::OrderError;
    use order_shared::observability::metrics::RecordingMetrics;
    use order_shared::test_utils::sample_order;

    use crate::cache::InMemoryOrderCache;
    use crate::repository::MockOrderRepositoryTrait;

    fn order() -> Order {
        sample_order("ABCDEFGHIJ", "TRACK12345")
    }

    fn build(
        repo: MockOrderRepositoryTrait,
    ) -> (
        OrderService<MockOrderRepositoryTrait, InMemoryOrderCache>,
        Arc<InMemoryOrderCache>,
        Arc<RecordingMetrics>,
    ) {
        let metrics = Arc::new(RecordingMetrics::new());
        let cache = Arc::new(InMemoryOrderCache::new(
            Duration::from_secs(120),
            64,
            metrics.clone(),
        ));
        let service = OrderService::new(Arc::new(repo), cache.clone(), metrics.clone());
        (service, cache, metrics)
    }

    #[tokio::test]
    async fn test_create_invalidates_cache_entry() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_create().times(1).returning(|_| Ok(()));
        let (service, cache, metrics) = build(repo);
        cache.set("ABCDEFGHIJ", order());

        service.create(&order()).await.unwrap();

        assert!(cache.get("ABCDEFGHIJ").is_none());
        assert_eq!(metrics.snapshot().orders_created, 1);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_cache_untouched() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_create().times(1).returning(|o| {
            Err(OrderError::AlreadyExists {
                order_uid: o.order_uid.clone(),
            })
        });
        let (service, cache, metrics) = build(repo);
        cache.set("ABCDEFGHIJ", order());

        let err = service.create(&order()).await.unwrap_err();

        assert!(matches!(err, OrderError::AlreadyExists { .. }));
        assert!(cache.get("ABCDEFGHIJ").is_some());
        assert_eq!(metrics.snapshot().orders_created, 0);
    }

    #[tokio::test]
    async fn test_get_order_hit_skips_repository() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_get_order().never();
        let (service, cache, _) = build(repo);
        cache.set("ABCDEFGHIJ", order());

        assert_eq!(service.get_order("ABCDEFGHIJ").await.unwrap(), order());
    }

    #[tokio::test]
    async fn test_get_order_miss_populates_cache() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_get_order()
            .with(function(|uid: &str| uid == "ABCDEFGHIJ"))
            .times(1)
            .returning(|_| Ok(order()));
        let (service, cache, _) = build(repo);

        assert_eq!(service.get_order("ABCDEFGHIJ").await.unwrap(), order());
        assert_eq!(cache.get("ABCDEFGHIJ"), Some(order()));

        // 第二次读取命中缓存，mock 的 times(1) 保证不再回源
        assert_eq!(service.get_order("ABCDEFGHIJ").await.unwrap(), order());
    }

    #[tokio::test]
    async fn test_get_order_not_found_does_not_cache() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_get_order().times(2).returning(|uid| {
            Err(OrderError::NotFound {
                order_uid: uid.to_string(),
            })
        });
        let (service, cache, _) = build(repo);

        for _ in 0..2 {
            let err = service.get_order("UNKNOWN000").await.unwrap_err();
            assert!(matches!(err, OrderError::NotFound { .. }));
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_warm_up_loads_all_orders() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_get_all().times(1).returning(|| {
            Ok(vec![
                sample_order("ORDER00001", "TRACK00001"),
                sample_order("ORDER00002", "TRACK00002"),
            ])
        });
        let (service, cache, metrics) = build(repo);

        assert_eq!(service.warm_up_cache().await.unwrap(), 2);
        assert!(cache.get("ORDER00001").is_some());
        assert!(cache.get("ORDER00002").is_some());
        assert_eq!(metrics.cache_size(), Some(2));
    }

    #[tokio::test]
    async fn test_warm_up_failure_propagates() {
        let mut repo = MockOrderRepositoryTrait::new();
        repo.expect_get_all()
            .times(1)
            .returning(|| Err(OrderError::Internal("connection refused".into())));
        let (service, cache, _) = build(repo);

        assert!(service.warm_up_cache().await.is_err());
        assert!(cache.is_empty());
    }
}

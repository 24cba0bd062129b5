//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，便于使用 mock 或内存实现测试

use async_trait::async_trait;
use order_shared::error::Result;
use order_shared::models::Order;

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 原子地持久化整个订单聚合；order_uid 已存在时返回 `AlreadyExists`
    async fn create(&self, order: &Order) -> Result<()>;

    /// 组装完整订单；订单行不存在返回 `NotFound`，关联数据缺失返回 `PartialData`
    async fn get_order(&self, order_uid: &str) -> Result<Order>;

    /// 按创建时间倒序返回所有可完整组装的订单
    async fn get_all(&self) -> Result<Vec<Order>>;
}

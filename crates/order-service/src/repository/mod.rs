//! 数据访问层
//!
//! `traits` 定义仓储接口，`order_repo` 为 PostgreSQL 实现，
//! `memory` 为内存实现，`schema` 负责建表。

mod memory;
mod order_repo;
pub mod schema;
mod traits;

pub use memory::InMemoryOrderRepository;
pub use order_repo::PgOrderRepository;
pub use traits::OrderRepositoryTrait;

#[cfg(test)]
pub use traits::MockOrderRepositoryTrait;

//! 内存订单仓储
//!
//! 语义与 PostgreSQL 实现一致（重复订单号返回 `AlreadyExists`，
//! 重复 track_number 视为约束冲突），用于本地联调与测试。
//! 支持预置失败，模拟瞬时或永久的存储错误。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use order_shared::error::{OrderError, Result};
use order_shared::models::Order;
use parking_lot::{Mutex, RwLock};

use super::traits::OrderRepositoryTrait;

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
    create_failures: Mutex<VecDeque<OrderError>>,
    get_failures: Mutex<VecDeque<OrderError>>,
    get_all_failures: Mutex<VecDeque<OrderError>>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.orders.write();
            for order in orders {
                map.insert(order.order_uid.clone(), order);
            }
        }
        repo
    }

    /// 下一次 `create` 返回给定错误，可多次调用排队
    pub fn fail_next_create(&self, err: OrderError) {
        self.create_failures.lock().push_back(err);
    }

    pub fn fail_next_get(&self, err: OrderError) {
        self.get_failures.lock().push_back(err);
    }

    pub fn fail_next_get_all(&self, err: OrderError) {
        self.get_all_failures.lock().push_back(err);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderRepositoryTrait for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_failures.lock().pop_front() {
            return Err(err);
        }

        let mut orders = self.orders.write();
        if orders.contains_key(&order.order_uid) {
            return Err(OrderError::AlreadyExists {
                order_uid: order.order_uid.clone(),
            });
        }
        if orders
            .values()
            .any(|existing| existing.track_number == order.track_number)
        {
            return Err(OrderError::Internal(format!(
                "duplicate key value violates unique constraint on track_number {}",
                order.track_number
            )));
        }

        orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Order> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.get_failures.lock().pop_front() {
            return Err(err);
        }

        self.orders
            .read()
            .get(order_uid)
            .cloned()
            .ok_or_else(|| OrderError::NotFound {
                order_uid: order_uid.to_string(),
            })
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        if let Some(err) = self.get_all_failures.lock().pop_front() {
            return Err(err);
        }

        let mut orders: Vec<Order> = self.orders.read().values().cloned().collect();
        orders.sort_by(|a, b| b.date_created.cmp(&a.date_created));
        Ok(orders)
    }
}

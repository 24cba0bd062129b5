//! 应用状态定义

use std::sync::Arc;

use order_shared::observability::metrics::MetricsSink;

use crate::service::OrderReader;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderReader>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl AppState {
    pub fn new(orders: Arc<dyn OrderReader>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { orders, metrics }
    }
}

//! 路由配置
//!
//! 只读 HTTP 接口：按订单号查询订单、CORS 预检与存活探针。

use axum::{Router, middleware, routing::get};
use order_shared::observability::middleware::http_tracing;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

fn order_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/order/{order_uid}",
            get(handlers::get_order).options(handlers::preflight),
        )
        .route(
            "/order",
            get(handlers::missing_order_uid).options(handlers::preflight),
        )
        .route(
            "/order/",
            get(handlers::missing_order_uid).options(handlers::preflight),
        )
}

/// 构建完整的应用路由
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(order_routes())
        .route("/health", get(handlers::health_check))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            http_tracing,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

//! HTTP 中间件
//!
//! 为每个请求创建追踪 span，并通过注入的 [`MetricsSink`] 记录请求指标。

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};

use super::metrics::MetricsSink;

/// HTTP 请求追踪和指标中间件
///
/// 指标的 path 标签使用路由模板（如 `/order/{order_uid}`），避免按订单号产生高基数标签。
///
/// ```ignore
/// let app = Router::new()
///     .route("/order/{order_uid}", get(get_order))
///     .layer(middleware::from_fn_with_state(sink, http_tracing));
/// ```
pub async fn http_tracing(
    State(sink): State<Arc<dyn MetricsSink>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let uri = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let span = info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as i64);

    sink.http_request(&method, &route, status, latency.as_secs_f64());

    response
}

//! 订单查询接口

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use order_shared::models::Order;
use serde_json::json;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /order/{order_uid}
#[instrument(skip(state))]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_uid = order_uid.trim();
    if order_uid.is_empty() {
        return Err(ApiError::MissingOrderUid);
    }

    let order = state.orders.get_order(order_uid).await?;
    Ok(Json(order))
}

/// GET /order 与 GET /order/
pub async fn missing_order_uid() -> ApiError {
    ApiError::MissingOrderUid
}

/// OPTIONS /order 与 OPTIONS /order/{order_uid}
pub async fn preflight() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "order-service"
    }))
}

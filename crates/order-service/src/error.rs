//! HTTP 错误映射
//!
//! 领域错误转换为状态码与 `{"error": "..."}` 响应体。内部错误只记录日志，
//! 响应中不暴露细节。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use order_shared::error::OrderError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("order_uid is required")]
    MissingOrderUid,

    #[error("Order {0} not found")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[source] OrderError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingOrderUid => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound { order_uid } => Self::NotFound(order_uid),
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            tracing::error!(error = %e, code = e.code(), "读取订单失败");
        }

        let body = json!({ "error": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}

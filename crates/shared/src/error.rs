//! 统一错误处理模块
//!
//! 定义订单管道中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 每个错误都可以被归类为瞬时（可重试）或永久（不可重试），
//! 消费者依据该分类决定重试还是直接提交偏移量。

use thiserror::Error;

use crate::retry::{ErrorClass, classify_message};

/// 订单系统错误类型
#[derive(Debug, Error)]
pub enum OrderError {
    // ==================== 数据库错误 ====================
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order {order_uid} not found")]
    NotFound { order_uid: String },

    #[error("order {order_uid} already exists")]
    AlreadyExists { order_uid: String },

    /// 订单行存在，但关联的 delivery/payment/items 读取失败
    #[error("order {order_uid} has partial data: {part} unavailable ({reason})")]
    PartialData {
        order_uid: String,
        part: &'static str,
        reason: String,
    },

    // ==================== 消息错误 ====================
    #[error("payload parse failed: {0}")]
    Parse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("kafka error: {0}")]
    Kafka(String),

    // ==================== 通用错误 ====================
    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OrderError>;

/// 瞬时的 SQLSTATE：序列化失败、死锁、锁等待、连接数耗尽、语句取消、数据库启动中
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "53300", "57014", "57P03"];

impl OrderError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::PartialData { .. } => "PARTIAL_DATA",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 错误分类
    ///
    /// 优先按类型判断；只有无法从类型得出结论的错误才退回到错误文本匹配。
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::PartialData { .. }
            | Self::Parse(_)
            | Self::Validation(_)
            | Self::Config(_) => ErrorClass::Permanent,
            Self::Kafka(_) => ErrorClass::Transient,
            Self::Database(err) => classify_sqlx(err),
            Self::Internal(msg) => classify_message(msg),
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => ErrorClass::Permanent,
        sqlx::Error::Database(db_err) => match db_err.code() {
            // 23xxx 完整性约束，42501 权限不足
            Some(code) if code.starts_with("23") || code == "42501" => ErrorClass::Permanent,
            // 08xxx 连接异常
            Some(code) if code.starts_with("08") => ErrorClass::Transient,
            Some(code) if TRANSIENT_SQLSTATES.contains(&&*code) => ErrorClass::Transient,
            _ => classify_message(db_err.message()),
        },
        other => classify_message(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = OrderError::NotFound {
            order_uid: "ABCDEFGHIJ".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "order ABCDEFGHIJ not found");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = OrderError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let exists = OrderError::AlreadyExists {
            order_uid: "ABCDEFGHIJ".to_string(),
        };
        assert!(!exists.is_retryable());

        let validation = OrderError::Validation("track_number".to_string());
        assert!(!validation.is_retryable());
    }

    #[test]
    fn test_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = OrderError::Database(sqlx::Error::Io(io));
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_internal_falls_back_to_message() {
        assert_eq!(
            OrderError::Internal("dial tcp: connection refused".to_string()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            OrderError::Internal("something odd happened".to_string()).class(),
            ErrorClass::Permanent
        );
    }
}

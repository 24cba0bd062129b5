//! 重试策略与错误分类
//!
//! 提供线性退避重试机制，用于瞬时故障（网络抖动、连接池耗尽、锁竞争等）的自动恢复。
//! 业务错误（重复键、校验失败）不应被重试，由调用方通过 `is_retryable` 闭包控制。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ErrorClass: 错误分类
// ---------------------------------------------------------------------------

/// 错误分类：瞬时错误可重试，永久错误重试也必然失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// 已知的瞬时错误文本片段
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "timed out",
    "deadline exceeded",
    "database is locked",
    "too many connections",
    "network error",
    "temporary failure",
    "try again later",
];

/// 已知的永久错误文本片段
pub const PERMANENT_PATTERNS: &[&str] = &[
    "validation failed",
    "invalid",
    "not found",
    "duplicate key",
    "already exists",
    "permission denied",
    "constraint",
];

/// 按错误文本分类（类型信息不足时的兜底手段）
///
/// 瞬时模式优先匹配；两类都不匹配时视为永久错误。
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Transient;
    }
    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Permanent;
    }
    ErrorClass::Permanent
}

// ---------------------------------------------------------------------------
// RetryPolicy: 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 线性退避：第 1 次失败后等待 1 × base，第 2 次等待 2 × base，以此类推，
/// 不超过 max_delay。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次执行）
    pub max_attempts: u32,
    /// 退避基数
    pub base_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 3 次，退避 1s、2s，上限 10s
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt)
            .min(self.max_delay)
    }

    /// 已经失败 `attempt` 次后是否还有剩余尝试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy: 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 重试执行结果
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// 实际执行次数
    pub attempts: u32,
    /// 是否因尝试次数耗尽而放弃（区别于遇到不可重试错误立即放弃）
    pub exhausted: bool,
}

/// 带重试的异步执行器
///
/// 对任意异步操作应用重试策略。仅在操作返回可重试错误时才重试，
/// 不可重试错误在第一次出现时立即返回。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    exhausted: false,
                };
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "操作失败且不可重试"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                        exhausted: false,
                    };
                }

                if !policy.should_retry(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "已达最大尝试次数，放弃重试"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                        exhausted: true,
                    };
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

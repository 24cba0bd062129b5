//! 订单校验器
//!
//! 对候选订单执行全部字段级与聚合级约束检查，返回**所有**违反的约束，
//! 而不是遇到第一个就停止。校验是纯函数，无副作用。

use std::fmt;

use order_shared::error::OrderError;
use order_shared::models::Order;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 单条约束违反
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 字段路径，如 `delivery.email`、`items[0].price`；聚合级约束为所在对象路径
    pub field: String,
    /// 约束代码，如 `length`、`range`、`email`
    pub code: String,
    pub message: Option<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {} ({})", self.field, msg, self.code),
            None => write!(f, "{}: {}", self.field, self.code),
        }
    }
}

/// 校验失败，包含全部违反项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub violations: Vec<Violation>,
}

impl ValidationFailure {
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

impl From<ValidationFailure> for OrderError {
    fn from(failure: ValidationFailure) -> Self {
        OrderError::Validation(failure.to_string())
    }
}

/// 订单校验器
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, order: &Order) -> Result<(), ValidationFailure> {
        match order.validate() {
            Ok(()) => Ok(()),
            Err(errors) => {
                let mut violations = Vec::new();
                flatten("", &errors, &mut violations);
                violations.sort_by(|a, b| a.field.cmp(&b.field).then(a.code.cmp(&b.code)));
                Err(ValidationFailure { violations })
            }
        }
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    match (prefix.is_empty(), field == "__all__") {
        (true, true) => "order".to_string(),
        (false, true) => prefix.to_string(),
        (true, false) => field.to_string(),
        (false, false) => format!("{prefix}.{field}"),
    }
}

fn flatten(prefix: &str, errors: &ValidationErrors, out: &mut Vec<Violation>) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, field);
        match kind {
            ValidationErrorsKind::Field(list) => {
                out.extend(list.iter().map(|e| Violation {
                    field: path.clone(),
                    code: e.code.to_string(),
                    message: e.message.as_ref().map(|m| m.to_string()),
                }));
            }
            ValidationErrorsKind::Struct(inner) => flatten(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten(&format!("{path}[{index}]"), inner, out);
                }
            }
        }
    }
}

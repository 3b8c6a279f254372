//! 错误定义模块
//!
//! 放射科工作流对调用方暴露的错误分类。存储层的原始错误信息只写入日志，
//! 不会出现在 `Display` 输出中。

use thiserror::Error;

/// 放射科信息系统统一错误类型
#[derive(Error, Debug)]
pub enum RisError {
    /// 输入缺失或格式错误，调用方修正输入后可重试
    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// 当前状态不允许该操作
    #[error("无效状态: {entity} 当前为 {current}，无法执行 {attempted}")]
    InvalidState {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    /// 版本或唯一性检查失败，调用方需重新读取后再重试
    #[error("并发冲突: {entity} {id} 已被修改，请刷新后重试")]
    ConcurrencyConflict { entity: &'static str, id: String },

    /// 外部协作服务（签名、影像归档等）失败，本地状态未改变
    #[error("外部服务错误: {service}: {message}")]
    ExternalService { service: &'static str, message: String },

    #[error("数据存储错误")]
    Storage(String),

    #[error("配置错误: {0}")]
    Config(String),
}

impl RisError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RisError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl std::fmt::Debug,
        attempted: impl std::fmt::Debug,
    ) -> Self {
        RisError::InvalidState {
            entity,
            current: format!("{:?}", current),
            attempted: format!("{:?}", attempted),
        }
    }

    pub fn conflict(entity: &'static str, id: impl ToString) -> Self {
        RisError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
        }
    }

    /// 调用方在重新读取状态后可以安全重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, RisError::ConcurrencyConflict { .. })
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for RisError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 23505 unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return RisError::conflict("record", db_err.constraint().unwrap_or("unique"));
            }
        }
        tracing::error!("Storage failure: {}", err);
        RisError::Storage(err.to_string())
    }
}

/// 放射科信息系统统一结果类型
pub type Result<T> = std::result::Result<T, RisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_hides_driver_message() {
        let err = RisError::Storage("connection refused (os error 111)".to_string());
        assert_eq!(err.to_string(), "数据存储错误");
    }

    #[test]
    fn test_invalid_state_carries_both_states() {
        let err = RisError::invalid_state("order", "Approved", "Cancel");
        match err {
            RisError::InvalidState { current, attempted, .. } => {
                assert!(current.contains("Approved"));
                assert!(attempted.contains("Cancel"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(RisError::conflict("report", 1).is_retryable());
        assert!(!RisError::Validation("x".into()).is_retryable());
    }
}

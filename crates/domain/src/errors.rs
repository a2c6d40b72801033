//! 领域模型错误定义
//!
//! 定义了私信系统中可能出现的领域错误与存储错误。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 消息无法解码
    #[error("消息格式错误: {message}")]
    MalformedMessage { message: String },
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建消息格式错误
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }
}

/// 持久化存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

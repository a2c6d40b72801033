use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("message hub is not running")]
    HubUnavailable,
}

impl ApplicationError {
    /// 创建认证错误
    pub fn authentication(reason: impl Into<String>) -> Self {
        ApplicationError::Authentication(reason.into())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

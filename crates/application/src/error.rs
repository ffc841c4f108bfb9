use domain::DomainError;
use thiserror::Error;

use crate::auth::AuthError;
use crate::notifications::NotificationError;
use crate::password::PasswordVerifierError;
use crate::registry::AdmissionError;
use crate::router::RouterError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("admission error: {0}")]
    Admission(#[from] AdmissionError),
    #[error("router error: {0}")]
    Router(#[from] RouterError),
    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),
    #[error("password error: {0}")]
    Password(#[from] PasswordVerifierError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

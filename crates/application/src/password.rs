use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordVerifierError {
    #[error("verify error: {0}")]
    Verify(String),
}

impl PasswordVerifierError {
    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 密码校验接口，实现必须使用常量时间比较
#[async_trait]
pub trait PasswordVerifier: Send + Sync {
    async fn verify(&self, plaintext: &str, hashed: &str) -> Result<bool, PasswordVerifierError>;
}

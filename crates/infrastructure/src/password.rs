use application::{PasswordVerifier, PasswordVerifierError};
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};

/// bcrypt 密码校验，计算放到阻塞线程池执行
#[derive(Clone)]
pub struct BcryptPasswordVerifier {
    cost: u32,
}

impl BcryptPasswordVerifier {
    pub fn new(cost: Option<u32>) -> Self {
        Self {
            cost: cost.unwrap_or(DEFAULT_COST),
        }
    }

    /// 生成哈希，供测试和运维脚本写入身份存储
    pub async fn hash(&self, plaintext: &str) -> Result<String, PasswordVerifierError> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || hash(plaintext, cost))
            .await
            .map_err(|err| PasswordVerifierError::verify_error(err.to_string()))
            .and_then(|res| res.map_err(|err| PasswordVerifierError::verify_error(err.to_string())))
    }
}

#[async_trait]
impl PasswordVerifier for BcryptPasswordVerifier {
    async fn verify(&self, plaintext: &str, hashed: &str) -> Result<bool, PasswordVerifierError> {
        let plaintext = plaintext.to_owned();
        let hashed = hashed.to_owned();
        match tokio::task::spawn_blocking(move || verify(plaintext, &hashed)).await {
            Ok(Ok(valid)) => Ok(valid),
            // 存储的哈希不是合法的 bcrypt 格式，视为不匹配
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "stored password hash is not a valid bcrypt hash");
                Ok(false)
            }
            Err(err) => Err(PasswordVerifierError::verify_error(err.to_string())),
        }
    }
}

impl Default for BcryptPasswordVerifier {
    fn default() -> Self {
        Self::new(Some(DEFAULT_COST))
    }
}

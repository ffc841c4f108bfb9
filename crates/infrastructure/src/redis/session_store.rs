//! Redis 会话存储
//!
//! 会话以 JSON 形式保存在 `<前缀><令牌>` 键下：
//! `{"identity_id": 1, "auth_hash": "<base64>"}`。过期由 Redis TTL 负责。

use async_trait::async_trait;
use config::RedisConfig;
use domain::{DomainResult, SessionRecord, SessionStore};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::warn;

use super::error::{RedisError, RedisResult};

#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisSessionStore {
    pub async fn connect(config: &RedisConfig) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            prefix: config.session_prefix.clone(),
        })
    }

    fn key(&self, token: &str) -> String {
        session_key(&self.prefix, token)
    }
}

fn session_key(prefix: &str, token: &str) -> String {
    format!("{prefix}{token}")
}

fn decode_record(raw: &str) -> RedisResult<SessionRecord> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, token: &str) -> DomainResult<Option<SessionRecord>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .get(self.key(token))
            .await
            .map_err(RedisError::from)?;

        match raw {
            Some(raw) => match decode_record(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    // 损坏的会话按不存在处理
                    warn!(error = %err, "会话记录无法解析");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::IdentityId;

    #[test]
    fn test_session_key() {
        assert_eq!(session_key("relay:session:", "abc"), "relay:session:abc");
    }

    #[test]
    fn test_decode_record() {
        let record = decode_record(r#"{"identity_id": 12, "auth_hash": "c2lnbmF0dXJl"}"#).unwrap();
        assert_eq!(record.identity_id, IdentityId(12));
        assert_eq!(record.auth_hash, "c2lnbmF0dXJl");

        assert!(matches!(
            decode_record("{}"),
            Err(RedisError::DeserializationError { .. })
        ));
    }
}

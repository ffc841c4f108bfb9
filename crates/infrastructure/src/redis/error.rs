//! Redis 错误类型定义

use application::NotificationError;
use domain::DomainError;
use thiserror::Error;

/// Redis 操作错误
#[derive(Error, Debug)]
pub enum RedisError {
    /// 连接错误
    #[error("Redis 连接错误: {message}")]
    ConnectionError { message: String },

    /// 订阅错误
    #[error("Redis 订阅错误: {message}")]
    SubscribeError { message: String },

    /// 反序列化错误
    #[error("反序列化错误: {message}")]
    DeserializationError { message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },
}

/// Redis 结果类型
pub type RedisResult<T> = Result<T, RedisError>;

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => RedisError::ConfigError {
                message: err.to_string(),
            },
            _ => RedisError::ConnectionError {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::DeserializationError {
            message: err.to_string(),
        }
    }
}

impl From<RedisError> for NotificationError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::SubscribeError { message } | RedisError::ConfigError { message } => {
                NotificationError::Subscribe(message)
            }
            other => NotificationError::Receive(other.to_string()),
        }
    }
}

impl From<RedisError> for DomainError {
    fn from(err: RedisError) -> Self {
        DomainError::storage_error(err.to_string())
    }
}

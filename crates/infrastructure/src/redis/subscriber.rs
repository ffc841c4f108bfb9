//! Redis 变更通知订阅者
//!
//! 每次 `subscribe` 建立一条新的 pub/sub 连接并订阅配置的频道。
//! 连接断开时返回错误，由上层的监督任务退避后重新订阅。

use application::{NotificationError, NotificationSource, NotificationSubscription};
use async_trait::async_trait;
use config::RedisConfig;
use futures_util::stream::StreamExt;
use redis::aio::PubSub;
use redis::Client;
use tracing::{debug, info};

use super::error::{RedisError, RedisResult};

pub struct RedisNotificationSource {
    client: Client,
    channel: String,
}

impl RedisNotificationSource {
    /// 创建订阅源，只校验配置，不立即连接
    pub fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        Ok(Self {
            client,
            channel: config.channel.clone(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn open(&self) -> RedisResult<PubSub> {
        let mut pubsub =
            self.client
                .get_async_pubsub()
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("获取 PubSub 连接失败: {}", e),
                })?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| RedisError::SubscribeError {
                message: format!("订阅频道 {} 失败: {}", self.channel, e),
            })?;
        Ok(pubsub)
    }
}

#[async_trait]
impl NotificationSource for RedisNotificationSource {
    async fn subscribe(&self) -> Result<Box<dyn NotificationSubscription>, NotificationError> {
        let pubsub = self.open().await?;
        info!(channel = %self.channel, "Redis 订阅已建立");
        Ok(Box::new(RedisSubscription {
            pubsub,
            channel: self.channel.clone(),
        }))
    }
}

struct RedisSubscription {
    pubsub: PubSub,
    channel: String,
}

#[async_trait]
impl NotificationSubscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<Option<String>, NotificationError> {
        let Some(msg) = self.pubsub.on_message().next().await else {
            return Err(RedisError::ConnectionError {
                message: format!("频道 {} 的订阅连接已断开", self.channel),
            }
            .into());
        };

        let payload: String = msg.get_payload().map_err(|e| RedisError::DeserializationError {
            message: format!("解析消息负载失败: {}", e),
        })?;
        debug!(channel = %self.channel, bytes = payload.len(), "收到 Redis 通知");
        Ok(Some(payload))
    }
}

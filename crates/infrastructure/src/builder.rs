use std::sync::Arc;

use application::RelayDependencies;
use config::AppConfig;
use thiserror::Error;
use tracing::info;

use crate::{
    password::BcryptPasswordVerifier,
    redis::{RedisError, RedisNotificationSource, RedisSessionStore},
    repository::{create_pg_pool, PgClientLogStore, PgIdentityStore, PgSnapshotSource},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
}

/// 生产环境的协作方集合：Postgres、Redis 和 bcrypt
#[derive(Clone)]
pub struct Infrastructure {
    pub identities: Arc<PgIdentityStore>,
    pub snapshots: Arc<PgSnapshotSource>,
    pub client_logs: Arc<PgClientLogStore>,
    pub sessions: Arc<RedisSessionStore>,
    pub notifications: Arc<RedisNotificationSource>,
    pub passwords: Arc<BcryptPasswordVerifier>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        info!(max_connections = config.database.max_connections, "数据库连接池已创建");

        let sessions = RedisSessionStore::connect(&config.redis).await?;
        let notifications = RedisNotificationSource::new(&config.redis)?;
        info!(channel = %config.redis.channel, "Redis 适配器已就绪");

        Ok(Self {
            identities: Arc::new(PgIdentityStore::new(pool.clone())),
            snapshots: Arc::new(PgSnapshotSource::new(
                pool.clone(),
                config.database.snapshot_query.clone(),
            )),
            client_logs: Arc::new(PgClientLogStore::new(pool)),
            sessions: Arc::new(sessions),
            notifications: Arc::new(notifications),
            passwords: Arc::new(BcryptPasswordVerifier::new(config.security.bcrypt_cost)),
        })
    }

    /// 转换为应用层的依赖集合
    pub fn dependencies(&self) -> RelayDependencies {
        RelayDependencies {
            identities: self.identities.clone(),
            sessions: self.sessions.clone(),
            passwords: self.passwords.clone(),
            snapshots: self.snapshots.clone(),
            client_logs: self.client_logs.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

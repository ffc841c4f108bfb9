//! 基础设施层实现。
//!
//! 提供 Postgres 存储、Redis 订阅与会话存储、bcrypt 密码校验等适配器，
//! 实现应用/领域层定义的接口。

pub mod builder;
pub mod password;
pub mod redis;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use password::BcryptPasswordVerifier;
pub use redis::{RedisError, RedisNotificationSource, RedisSessionStore};
pub use repository::{create_pg_pool, PgClientLogStore, PgIdentityStore, PgSnapshotSource};

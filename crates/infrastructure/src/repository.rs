//! Postgres 协作方实现
//!
//! 身份读取自 `users` 表，客户端日志写入 `logs` 表；快照由一条可配置的
//! 查询生成，查询必须返回单个 JSON 值。

use async_trait::async_trait;
use domain::{
    ClientLogRecord, ClientLogStore, DomainError, DomainResult, Identity, IdentityId,
    IdentityStore, Snapshot, SnapshotSource,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> DomainError {
    DomainError::storage_error(err.to_string())
}

#[derive(Debug, FromRow)]
struct IdentityRecord {
    id: i64,
    username: String,
    password_hash: String,
    is_active: bool,
    is_superuser: bool,
    enable_client_logs: bool,
}

impl From<IdentityRecord> for Identity {
    fn from(value: IdentityRecord) -> Self {
        Identity {
            id: IdentityId(value.id),
            username: value.username,
            password_hash: value.password_hash,
            is_active: value.is_active,
            is_superuser: value.is_superuser,
            enable_client_logs: value.enable_client_logs,
        }
    }
}

const IDENTITY_COLUMNS: &str = "id::bigint AS id, username, password AS password_hash, \
     is_active, is_superuser, enable_client_logs";

#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_id(&self, id: IdentityId) -> DomainResult<Option<Identity>> {
        let record = sqlx::query_as::<_, IdentityRecord>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Identity::from))
    }

    async fn find_by_username(&self, username: &str) -> DomainResult<Option<Identity>> {
        let record = sqlx::query_as::<_, IdentityRecord>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Identity::from))
    }
}

/// 执行配置的快照查询
#[derive(Clone)]
pub struct PgSnapshotSource {
    pool: PgPool,
    query: String,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool, query: impl Into<String>) -> Self {
        Self {
            pool,
            query: query.into(),
        }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    async fn fetch_snapshot(&self) -> DomainResult<Snapshot> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(&self.query)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(Snapshot::new(value))
    }
}

#[derive(Clone)]
pub struct PgClientLogStore {
    pool: PgPool,
}

impl PgClientLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientLogStore for PgClientLogStore {
    async fn upsert(&self, record: ClientLogRecord) -> DomainResult<bool> {
        // xmax = 0 表示本次是插入而不是更新
        let created = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO logs (id, created_by_id, ip_address, type, description, created_at)
            VALUES ($1, $2, $3::inet, $4, $5, COALESCE($6::timestamptz, NOW()))
            ON CONFLICT (id) DO UPDATE
            SET created_by_id = EXCLUDED.created_by_id,
                ip_address = EXCLUDED.ip_address,
                type = EXCLUDED.type,
                description = EXCLUDED.description,
                created_at = EXCLUDED.created_at
            RETURNING (xmax = 0) AS created
            "#,
        )
        .bind(record.id)
        .bind(record.created_by.0)
        .bind(record.ip_address)
        .bind(record.log_type)
        .bind(record.description)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(created)
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_record_conversion() {
        let identity = Identity::from(IdentityRecord {
            id: 4,
            username: "dj".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            is_active: true,
            is_superuser: false,
            enable_client_logs: true,
        });
        assert_eq!(identity.id, IdentityId(4));
        assert!(identity.can_use(domain::Role::Regular));
        assert!(!identity.can_use(domain::Role::Privileged));
    }

    #[test]
    fn test_storage_errors_map_to_domain() {
        let err = map_sqlx_err(sqlx::Error::RowNotFound);
        assert!(matches!(err, DomainError::StorageError { .. }));
    }
}

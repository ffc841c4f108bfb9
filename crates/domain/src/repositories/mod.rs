//! 外部协作方接口定义
//!
//! 持久化存储、会话存储和快照生成都不属于本系统，
//! 这里只定义中继消费它们的最小接口，由外层实现。

use crate::entities::{ClientLogRecord, Identity, IdentityId, Snapshot};
use crate::errors::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 身份存储接口
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// 根据ID查找身份
    async fn find_by_id(&self, id: IdentityId) -> DomainResult<Option<Identity>>;

    /// 根据用户名查找身份
    async fn find_by_username(&self, username: &str) -> DomainResult<Option<Identity>>;
}

/// 会话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub identity_id: IdentityId,
    /// 登录时根据密码哈希计算的会话校验值
    pub auth_hash: String,
}

/// 会话存储接口
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 根据会话令牌查找会话，过期或不存在时返回 `None`
    async fn get(&self, token: &str) -> DomainResult<Option<SessionRecord>>;
}

/// 快照来源接口
///
/// 可能开销较大；去抖保证同一时刻最多只有一个刷新在执行。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> DomainResult<Snapshot>;
}

/// 客户端日志存储接口
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ClientLogStore: Send + Sync {
    /// 写入或覆盖一条日志，返回是否为新建
    async fn upsert(&self, record: ClientLogRecord) -> DomainResult<bool>;
}

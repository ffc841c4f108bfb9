//! 内存版协作方实现
//!
//! 用于开发环境和测试，不依赖 Postgres 或 Redis。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use domain::{
    ClientLogRecord, ClientLogStore, DomainResult, Identity, IdentityId, IdentityStore,
    SessionRecord, SessionStore, Snapshot, SnapshotSource,
};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::notifications::{NotificationError, NotificationSource, NotificationSubscription};

#[derive(Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<IdentityId, Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖
    pub async fn insert(&self, identity: Identity) {
        self.identities.write().await.insert(identity.id, identity);
    }

    pub async fn remove(&self, id: IdentityId) -> Option<Identity> {
        self.identities.write().await.remove(&id)
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_id(&self, id: IdentityId) -> DomainResult<Option<Identity>> {
        Ok(self.identities.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> DomainResult<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|identity| identity.username == username)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: impl Into<String>, record: SessionRecord) {
        self.sessions.write().await.insert(token.into(), record);
    }

    pub async fn remove(&self, token: &str) -> Option<SessionRecord> {
        self.sessions.write().await.remove(token)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> DomainResult<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(token).cloned())
    }
}

#[derive(Default)]
pub struct MemoryClientLogStore {
    records: RwLock<HashMap<Uuid, ClientLogRecord>>,
}

impl MemoryClientLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<ClientLogRecord> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ClientLogStore for MemoryClientLogStore {
    async fn upsert(&self, record: ClientLogRecord) -> DomainResult<bool> {
        Ok(self
            .records
            .write()
            .await
            .insert(record.id, record)
            .is_none())
    }
}

/// 返回可替换快照的来源，并统计拉取次数
pub struct MemorySnapshotSource {
    snapshot: RwLock<Snapshot>,
    fetches: AtomicUsize,
}

impl MemorySnapshotSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            fetches: AtomicUsize::new(0),
        }
    }

    pub async fn set(&self, snapshot: Snapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshotSource {
    async fn fetch_snapshot(&self) -> DomainResult<Snapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.read().await.clone())
    }
}

/// 进程内 pub/sub，发布的负载会送到所有当前订阅
pub struct MemoryNotificationSource {
    sender: broadcast::Sender<String>,
    subscriptions: AtomicUsize,
}

impl MemoryNotificationSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender,
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// 发布一条原始负载，返回收到的订阅数
    pub fn publish(&self, payload: impl Into<String>) -> usize {
        self.sender.send(payload.into()).unwrap_or(0)
    }

    /// 累计订阅次数
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// 当前仍在监听的订阅数
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryNotificationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSource for MemoryNotificationSource {
    async fn subscribe(&self) -> Result<Box<dyn NotificationSubscription>, NotificationError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySubscription {
            receiver: self.sender.subscribe(),
        }))
    }
}

struct MemorySubscription {
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl NotificationSubscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<String>, NotificationError> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "内存订阅落后，跳过部分通知");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(NotificationError::Closed),
            }
        }
    }
}

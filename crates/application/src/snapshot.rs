//! 快照缓存与发布
//!
//! 缓存整体替换，读者只会看到旧值或完整的新值。发布器把"拉取、比较、
//! 替换、广播"串成一步，并且和新连接的问候共用一把发布锁，
//! 保证问候不会在更新的广播之后送出旧快照。

use std::sync::Arc;

use domain::{outgoing, Snapshot, SnapshotSource};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::BroadcastService;
use crate::connection::ConnectionHandle;
use crate::supervisor::{retry_on_failure, RetryPolicy};

/// 最近一次广播的快照
pub struct SnapshotCache {
    value: watch::Sender<Option<Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (value, _) = watch::channel(None);
        Self { value }
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.value.borrow().clone()
    }

    /// 整体替换
    pub fn replace(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.value.send_replace(Some(snapshot.clone()));
        snapshot
    }

    /// 与缓存值不同（或缓存为空）时返回 true
    pub fn differs_from(&self, snapshot: &Snapshot) -> bool {
        match self.value.borrow().as_deref() {
            Some(current) => current != snapshot,
            None => true,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// 等待第一份快照就绪
    pub async fn wait_ready(&self) -> Option<Arc<Snapshot>> {
        let mut receiver = self.value.subscribe();
        let ready = receiver.wait_for(|value| value.is_some()).await.ok()?;
        ready.clone()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次刷新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 快照已替换并广播
    Broadcast { delivered: usize },
    /// 快照未变化，未广播
    Unchanged,
    /// 拉取过程中收到关闭信号
    Cancelled,
}

pub struct SnapshotPublisher {
    cache: Arc<SnapshotCache>,
    source: Arc<dyn SnapshotSource>,
    broadcast: Arc<BroadcastService>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    reload_playlist_after_data_changes: bool,
    publish_lock: Mutex<()>,
}

impl SnapshotPublisher {
    pub fn new(
        cache: Arc<SnapshotCache>,
        source: Arc<dyn SnapshotSource>,
        broadcast: Arc<BroadcastService>,
        retry: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache,
            source,
            broadcast,
            retry,
            shutdown,
            reload_playlist_after_data_changes: false,
            publish_lock: Mutex::new(()),
        }
    }

    /// 数据变化后额外广播一次 `reload-playlist`
    pub fn with_reload_playlist_after_data_changes(mut self, enabled: bool) -> Self {
        self.reload_playlist_after_data_changes = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// 拉取快照，与缓存不同或 `force` 时替换并广播
    ///
    /// 拉取失败会带退避无限重试，直到成功或关闭。
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        let source = self.source.clone();
        let Some(snapshot) = retry_on_failure("snapshot-fetch", self.retry, &self.shutdown, || {
            let source = source.clone();
            async move { source.fetch_snapshot().await }
        })
        .await
        else {
            return RefreshOutcome::Cancelled;
        };

        let _guard = self.publish_lock.lock().await;
        if !force && !self.cache.differs_from(&snapshot) {
            debug!("快照未变化，不广播");
            return RefreshOutcome::Unchanged;
        }

        let snapshot = self.cache.replace(snapshot);
        let delivered = self
            .broadcast
            .broadcast_all(outgoing::DATA, snapshot.as_value().clone())
            .await;
        if self.reload_playlist_after_data_changes {
            self.broadcast
                .broadcast_all(outgoing::RELOAD_PLAYLIST, Value::Null)
                .await;
        }
        info!(force, delivered, "快照已更新并广播");
        RefreshOutcome::Broadcast { delivered }
    }

    /// 向新准入的普通连接发送当前快照
    pub async fn greet(&self, connection: &ConnectionHandle) -> bool {
        let Some(_) = self.cache.wait_ready().await else {
            return false;
        };
        let _guard = self.publish_lock.lock().await;
        match self.cache.current() {
            Some(snapshot) => self.broadcast.send_to_one(
                connection,
                outgoing::DATA,
                snapshot.as_value().clone(),
            ),
            None => false,
        }
    }
}

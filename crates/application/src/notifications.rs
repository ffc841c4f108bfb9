//! 变更通知总线
//!
//! 启动时先无条件刷新一次快照，然后启动两个被监督的任务：
//! - 订阅消费者：带超时地等待下一条 pub/sub 消息。超时视为一次无条件刷新
//!   触发（弥补可能丢失的通知）；`logout` 等控制类通知立即执行；
//!   数据变化类通知放入刷新队列。
//! - 去抖器：尾沿去抖，一个窗口内的多条通知合并成一次拉取。
//!
//! 订阅出错时由监督器退避重连，启动刷新不会重复执行。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::RelayConfig;
use domain::{parse_notifications, IdentityId, IdentityStore, PendingNotification, Role};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastService;
use crate::registry::ConnectionRegistry;
use crate::snapshot::{RefreshOutcome, SnapshotPublisher};
use crate::supervisor::TaskSupervisor;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("subscription closed")]
    Closed,
}

/// pub/sub 传输
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn subscribe(&self) -> Result<Box<dyn NotificationSubscription>, NotificationError>;
}

/// 一次订阅的生命周期
#[async_trait]
pub trait NotificationSubscription: Send {
    /// 下一条原始负载；`Ok(None)` 表示传输产生了一次空唤醒
    async fn next_message(&mut self) -> Result<Option<String>, NotificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSettings {
    pub poll_timeout: Duration,
    pub debounce_window: Duration,
    /// 订阅建立后传输可能产生一次空唤醒，忽略它而不是当作超时
    pub ignore_first_empty_poll: bool,
}

impl NotificationSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            debounce_window: config.debounce_window(),
            ignore_first_empty_poll: config.ignore_first_empty_poll,
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30),
            debounce_window: Duration::from_millis(200),
            ignore_first_empty_poll: true,
        }
    }
}

pub struct ChangeNotificationBus {
    source: Arc<dyn NotificationSource>,
    publisher: Arc<SnapshotPublisher>,
    privileged: Arc<ConnectionRegistry>,
    regular: Arc<BroadcastService>,
    identities: Arc<dyn IdentityStore>,
    settings: NotificationSettings,
    refresh_tx: mpsc::UnboundedSender<bool>,
    refresh_rx: Mutex<mpsc::UnboundedReceiver<bool>>,
}

impl ChangeNotificationBus {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        publisher: Arc<SnapshotPublisher>,
        privileged: Arc<ConnectionRegistry>,
        regular: Arc<BroadcastService>,
        identities: Arc<dyn IdentityStore>,
        settings: NotificationSettings,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        Self {
            source,
            publisher,
            privileged,
            regular,
            identities,
            settings,
            refresh_tx,
            refresh_rx: Mutex::new(refresh_rx),
        }
    }

    /// 启动刷新并派生后台任务；启动刷新期间被关闭时返回 false
    pub async fn start(self: &Arc<Self>, supervisor: &TaskSupervisor) -> bool {
        info!("执行启动快照刷新");
        if self.publisher.refresh(true).await == RefreshOutcome::Cancelled {
            return false;
        }

        let bus = self.clone();
        supervisor.spawn("notification-consumer", move || {
            let bus = bus.clone();
            async move { bus.consume().await }
        });

        let bus = self.clone();
        supervisor.spawn("snapshot-debouncer", move || {
            let bus = bus.clone();
            async move {
                bus.debounce().await;
                Ok::<(), NotificationError>(())
            }
        });
        true
    }

    /// 一次订阅的完整生命周期，出错即返回，由监督器重连
    async fn consume(&self) -> Result<(), NotificationError> {
        let mut subscription = self.source.subscribe().await?;
        info!("已订阅变更通知");
        let mut empty_poll_seen = false;

        loop {
            match timeout(self.settings.poll_timeout, subscription.next_message()).await {
                Err(_) => {
                    debug!("等待通知超时，触发无条件刷新");
                    self.queue_refresh(false);
                }
                Ok(Ok(None)) => {
                    if self.settings.ignore_first_empty_poll && !empty_poll_seen {
                        empty_poll_seen = true;
                        debug!("忽略订阅后的首次空轮询");
                        continue;
                    }
                    self.queue_refresh(false);
                }
                Ok(Ok(Some(payload))) => self.dispatch_payload(&payload).await,
                Ok(Err(err)) => return Err(err),
            }
        }
    }

    async fn dispatch_payload(&self, payload: &str) {
        let batch = match parse_notifications(payload) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, payload, "无法解析的通知，已丢弃");
                return;
            }
        };
        for err in &batch.rejected {
            warn!(error = %err, payload, "跳过无法解码的通知项");
        }
        for notification in batch.notifications {
            self.handle_notification(notification).await;
        }
    }

    /// 处理一条通知；刷新类入队，控制类立即执行
    pub async fn handle_notification(&self, notification: PendingNotification) {
        debug!(kind = notification.kind(), "收到通知");
        match notification {
            PendingNotification::DataChanged => self.queue_refresh(false),
            PendingNotification::ForceRefresh => self.queue_refresh(true),
            PendingNotification::Logout {
                identity_ids,
                privileged_only,
            } => {
                self.logout(&identity_ids, privileged_only).await;
            }
            PendingNotification::IdentityChanged {
                identity_id,
                password_change,
            } => {
                self.identity_changed(identity_id, password_change).await;
            }
            PendingNotification::ReloadPlaylist { identity_id } => {
                self.reload_playlist(identity_id).await;
            }
        }
    }

    fn queue_refresh(&self, force: bool) {
        if self.refresh_tx.send(force).is_err() {
            warn!("刷新队列已关闭");
        }
    }

    async fn debounce(&self) {
        let mut receiver = self.refresh_rx.lock().await;
        while let Some(force) = receiver.recv().await {
            let force = self.collect_window(&mut receiver, force).await;
            if self.publisher.refresh(force).await == RefreshOutcome::Cancelled {
                break;
            }
        }
    }

    /// 收集一个去抖窗口内的通知，返回合并后的 force 标记
    async fn collect_window(&self, receiver: &mut mpsc::UnboundedReceiver<bool>, force: bool) -> bool {
        let window = self.settings.debounce_window;
        let deadline = sleep(window);
        tokio::pin!(deadline);
        let mut force = force;
        let mut coalesced = 1usize;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                next = receiver.recv() => match next {
                    Some(next_force) => {
                        force |= next_force;
                        coalesced += 1;
                        deadline.as_mut().reset(Instant::now() + window);
                    }
                    None => break,
                },
            }
        }

        debug!(coalesced, force, "去抖窗口结束");
        force
    }

    /// 立即关闭这些身份的连接，返回关闭的连接数
    pub async fn logout(&self, identity_ids: &[IdentityId], privileged_only: bool) -> usize {
        let mut closed = 0;
        for &identity_id in identity_ids {
            closed += close_identity(&self.privileged, identity_id).await;
            if !privileged_only {
                closed += close_identity(self.regular.registry(), identity_id).await;
            }
        }
        info!(
            identities = identity_ids.len(),
            privileged_only, closed, "logout processed"
        );
        closed
    }

    /// 身份信息变化后重新校验其连接；改过密码的身份直接断开全部连接
    pub async fn identity_changed(&self, identity_id: IdentityId, password_change: bool) {
        if password_change {
            info!(identity_id = %identity_id, "密码已变更，断开全部连接");
            self.logout(&[identity_id], false).await;
            return;
        }

        let identity = match self.identities.find_by_id(identity_id).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(identity_id = %identity_id, error = %err, "重新校验身份失败");
                return;
            }
        };

        match identity {
            Some(identity) if identity.can_use(Role::Privileged) => {
                self.privileged.refresh_identity(&identity).await;
                self.regular.registry().refresh_identity(&identity).await;
            }
            Some(identity) if identity.can_use(Role::Regular) => {
                close_identity(&self.privileged, identity_id).await;
                self.regular.registry().refresh_identity(&identity).await;
            }
            _ => {
                info!(identity_id = %identity_id, "身份已删除或停用，断开全部连接");
                self.logout(&[identity_id], false).await;
            }
        }
    }

    /// 通知普通客户端重新加载播放列表
    pub async fn reload_playlist(&self, identity_id: Option<IdentityId>) -> usize {
        let message_type = domain::outgoing::RELOAD_PLAYLIST;
        let delivered = match identity_id {
            Some(identity_id) => {
                self.regular
                    .send_to_identity(identity_id, message_type, Value::Null)
                    .await
            }
            None => self.regular.broadcast_all(message_type, Value::Null).await,
        };
        info!(?identity_id, delivered, "reload-playlist sent");
        delivered
    }
}

async fn close_identity(registry: &ConnectionRegistry, identity_id: IdentityId) -> usize {
    let connections = registry.connections_for(identity_id).await;
    for connection in &connections {
        connection.close();
        registry.remove(&connection.id()).await;
    }
    connections.len()
}

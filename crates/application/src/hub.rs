//! 中继上下文
//!
//! 启动时构建一次，持有全部共享组件：认证网关、两类受众的登记表/广播/路由、
//! 快照发布器、通知总线和任务监督器。生命周期跟随进程启动和关闭。

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use domain::{
    incoming, outgoing, ClientLogStore, IdentityStore, Role, ServerStatus, SessionAuthHasher,
    SessionStore, SnapshotSource,
};
use serde_json::json;
use tracing::info;

use crate::auth::AuthenticationGate;
use crate::broadcast::BroadcastService;
use crate::connection::ConnectionHandle;
use crate::error::ApplicationResult;
use crate::handlers::{ClientLogHandler, ReloadPlaylistHandler};
use crate::notifications::{ChangeNotificationBus, NotificationSettings, NotificationSource};
use crate::password::PasswordVerifier;
use crate::registry::{AdmissionError, ConnectionRegistry};
use crate::router::MessageRouter;
use crate::snapshot::{SnapshotCache, SnapshotPublisher};
use crate::supervisor::{RetryPolicy, TaskSupervisor};

pub const SERVER_NAME: &str = "station-relay";

/// 中继运行参数
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub protocol_version: i64,
    pub secret_key: Vec<u8>,
    pub notifications: NotificationSettings,
    pub retry: RetryPolicy,
    /// 认证失败后的随机延迟区间
    pub auth_delay: RetryPolicy,
    pub handshake_timeout: Duration,
    pub single_login: bool,
    pub reload_playlist_after_data_changes: bool,
}

impl RelaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let relay = &config.relay;
        Self {
            protocol_version: relay.protocol_version,
            secret_key: config.security.secret_key.as_bytes().to_vec(),
            notifications: NotificationSettings::from_config(relay),
            retry: RetryPolicy::from_config(relay),
            auth_delay: RetryPolicy::new(
                Duration::from_millis(relay.auth_delay_min_ms),
                Duration::from_millis(relay.auth_delay_max_ms),
            ),
            handshake_timeout: relay.handshake_timeout(),
            single_login: relay.single_login,
            reload_playlist_after_data_changes: relay.reload_playlist_after_data_changes,
        }
    }
}

/// 外部协作方
pub struct RelayDependencies {
    pub identities: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub passwords: Arc<dyn PasswordVerifier>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub client_logs: Arc<dyn ClientLogStore>,
    pub notifications: Arc<dyn NotificationSource>,
}

/// 一类受众的组件
pub struct Audience {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcast: Arc<BroadcastService>,
    pub router: MessageRouter,
}

pub struct RelayHub {
    settings: RelaySettings,
    gate: AuthenticationGate,
    privileged: Audience,
    regular: Audience,
    publisher: Arc<SnapshotPublisher>,
    bus: Arc<ChangeNotificationBus>,
    supervisor: TaskSupervisor,
}

impl RelayHub {
    /// 构建上下文；路由表不完整时直接返回错误
    pub fn new(settings: RelaySettings, deps: RelayDependencies) -> ApplicationResult<Self> {
        let supervisor = TaskSupervisor::new(settings.retry);

        let regular_registry = Arc::new(ConnectionRegistry::new(Role::Regular));
        regular_registry.set_single_login(settings.single_login);
        let regular_broadcast = Arc::new(BroadcastService::new(regular_registry.clone()));
        let privileged_registry = Arc::new(ConnectionRegistry::new(Role::Privileged));
        let privileged_broadcast = Arc::new(BroadcastService::new(privileged_registry.clone()));

        let regular_router = MessageRouter::builder(Role::Regular, incoming::REGULAR)
            .handler(
                incoming::LOG,
                Arc::new(ClientLogHandler::new(deps.client_logs.clone())),
            )
            .build()?;
        let privileged_router = MessageRouter::builder(Role::Privileged, incoming::PRIVILEGED)
            .handler(
                incoming::RELOAD_PLAYLIST,
                Arc::new(ReloadPlaylistHandler::new(regular_broadcast.clone())),
            )
            .build()?;

        let publisher = Arc::new(
            SnapshotPublisher::new(
                Arc::new(SnapshotCache::new()),
                deps.snapshots.clone(),
                regular_broadcast.clone(),
                settings.retry,
                supervisor.token(),
            )
            .with_reload_playlist_after_data_changes(settings.reload_playlist_after_data_changes),
        );

        let bus = Arc::new(ChangeNotificationBus::new(
            deps.notifications.clone(),
            publisher.clone(),
            privileged_registry.clone(),
            regular_broadcast.clone(),
            deps.identities.clone(),
            settings.notifications,
        ));

        let gate = AuthenticationGate::new(
            settings.protocol_version,
            deps.identities,
            deps.sessions,
            deps.passwords,
            SessionAuthHasher::new(&settings.secret_key),
        );

        Ok(Self {
            settings,
            gate,
            privileged: Audience {
                registry: privileged_registry,
                broadcast: privileged_broadcast,
                router: privileged_router,
            },
            regular: Audience {
                registry: regular_registry,
                broadcast: regular_broadcast,
                router: regular_router,
            },
            publisher,
            bus,
            supervisor,
        })
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn gate(&self) -> &AuthenticationGate {
        &self.gate
    }

    pub fn audience(&self, role: Role) -> &Audience {
        match role {
            Role::Privileged => &self.privileged,
            Role::Regular => &self.regular,
        }
    }

    pub fn publisher(&self) -> &Arc<SnapshotPublisher> {
        &self.publisher
    }

    pub fn bus(&self) -> &Arc<ChangeNotificationBus> {
        &self.bus
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            server: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: self.settings.protocol_version,
        }
    }

    /// 启动通知总线
    pub async fn start(&self) -> bool {
        let started = self.bus.start(&self.supervisor).await;
        if started {
            info!(tasks = self.supervisor.len(), "中继后台任务已启动");
        }
        started
    }

    /// 取消并等待全部后台任务，然后关闭所有连接
    pub async fn shutdown(&self) {
        info!("正在停止中继后台任务");
        self.supervisor.shutdown().await;

        let mut closed = 0;
        for audience in [&self.regular, &self.privileged] {
            for connection in audience.registry.all().await {
                connection.close();
                closed += 1;
            }
        }
        info!(closed, "已关闭全部连接");
    }

    pub async fn admit(&self, connection: ConnectionHandle) -> Result<(), AdmissionError> {
        self.audience(connection.role()).registry.admit(connection).await
    }

    /// 从所属登记表移除，可重复调用
    pub async fn release(&self, connection: &ConnectionHandle) -> bool {
        self.audience(connection.role())
            .registry
            .remove(&connection.id())
            .await
    }

    /// 准入后的问候：普通客户端收到当前快照，管理端收到在线客户端数
    pub async fn greet(&self, connection: &ConnectionHandle) -> bool {
        match connection.role() {
            Role::Regular => self.publisher.greet(connection).await,
            Role::Privileged => {
                let num_connected_users = self.regular.registry.count().await;
                self.privileged.broadcast.send_to_one(
                    connection,
                    outgoing::HELLO,
                    json!({ "num_connected_users": num_connected_users }),
                )
            }
        }
    }

    /// 两类受众的在线连接数
    pub async fn connection_counts(&self) -> (usize, usize) {
        (
            self.regular.registry.count().await,
            self.privileged.registry.count().await,
        )
    }
}

//! 应用层实现。
//!
//! 中继的核心逻辑：认证、连接登记、消息路由、快照缓存与广播、
//! 变更通知消费以及后台任务监督。对外部协作方（身份存储、会话存储、
//! 快照来源、pub/sub 传输）只依赖领域层和本层定义的接口。

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod memory;
pub mod notifications;
pub mod password;
pub mod registry;
pub mod router;
pub mod snapshot;
pub mod supervisor;

pub use auth::{AuthError, AuthenticatedIdentity, AuthenticationGate};
pub use broadcast::BroadcastService;
pub use connection::{ConnectionHandle, ConnectionSendError, Outbound};
pub use error::{ApplicationError, ApplicationResult};
pub use handlers::{ClientLogHandler, ReloadPlaylistHandler};
pub use hub::{Audience, RelayDependencies, RelayHub, RelaySettings};
pub use memory::{
    MemoryClientLogStore, MemoryIdentityStore, MemoryNotificationSource, MemorySessionStore,
    MemorySnapshotSource,
};
pub use notifications::{
    ChangeNotificationBus, NotificationError, NotificationSettings, NotificationSource,
    NotificationSubscription,
};
pub use password::{PasswordVerifier, PasswordVerifierError};
pub use registry::{AdmissionError, ConnectionRegistry};
pub use router::{HandlerError, MessageHandler, MessageRouter, MessageRouterBuilder, Reply, RouterError};
pub use snapshot::{RefreshOutcome, SnapshotCache, SnapshotPublisher};
pub use supervisor::{retry_on_failure, RetryPolicy, SupervisedTask, TaskSupervisor};

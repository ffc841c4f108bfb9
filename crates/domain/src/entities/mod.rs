//! 领域实体定义
//!
//! 包含中继的核心实体：身份、连接、快照、协议消息与变更通知。

pub mod client_log;
pub mod connection;
pub mod identity;
pub mod notification;
pub mod protocol;
pub mod snapshot;

// 重新导出核心实体
pub use client_log::{
    ClientLogRecord, CLIENT_LOG_TYPES, INTERNAL_ERROR_LOG_TYPE, UNSPECIFIED_LOG_TYPE,
};
pub use connection::{ConnectionId, Role};
pub use identity::{Identity, IdentityId};
pub use notification::{kinds, parse_notifications, NotificationBatch, PendingNotification};
pub use protocol::{
    incoming, outgoing, Credentials, Envelope, HandshakeFailure, HandshakeRequest,
    HandshakeSuccess, ServerStatus,
};
pub use snapshot::Snapshot;

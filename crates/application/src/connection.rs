//! 连接句柄
//!
//! 每个已认证的连接在应用层只暴露为一个可廉价克隆的句柄：身份、角色、
//! 出站队列和关闭令牌。真正的 socket 读写由 web 层的会话负责，
//! 会话的写任务按 FIFO 顺序消费出站队列。

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use domain::{ConnectionId, Identity, IdentityId, Role};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// 出站指令
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// 已序列化的文本消息
    Text(Arc<str>),
    /// 关闭连接
    Close,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionSendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

struct ConnectionInner {
    id: ConnectionId,
    role: Role,
    peer_addr: Option<SocketAddr>,
    identity: RwLock<Arc<Identity>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_token: CancellationToken,
}

/// 连接句柄
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// 创建句柄，同时返回出站队列的接收端
    pub fn new(
        role: Role,
        identity: Identity,
        peer_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::generate(),
                role,
                peer_addr,
                identity: RwLock::new(Arc::new(identity)),
                outbound,
                close_token: CancellationToken::new(),
            }),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// 当前身份快照
    pub fn identity(&self) -> Arc<Identity> {
        self.inner
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn identity_id(&self) -> IdentityId {
        self.identity().id
    }

    /// 身份信息在外部被修改后刷新；ID 不会变化
    pub fn set_identity(&self, identity: Identity) {
        *self
            .inner
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(identity);
    }

    /// 把一条已序列化的消息放入出站队列
    pub fn send_text(&self, text: Arc<str>) -> Result<(), ConnectionSendError> {
        if self.inner.close_token.is_cancelled() {
            return Err(ConnectionSendError::Closed(self.inner.id));
        }
        self.inner
            .outbound
            .send(Outbound::Text(text))
            .map_err(|_| ConnectionSendError::Closed(self.inner.id))
    }

    /// 请求关闭连接，可重复调用
    pub fn close(&self) {
        if self.inner.close_token.is_cancelled() {
            return;
        }
        self.inner.close_token.cancel();
        let _ = self.inner.outbound.send(Outbound::Close);
        tracing::debug!(connection_id = %self.inner.id, "连接关闭请求已发出");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close_token.is_cancelled() || self.inner.outbound.is_closed()
    }

    /// 连接被关闭时完成
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.close_token.cancelled()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("identity", &self.identity_id())
            .field("peer_addr", &self.inner.peer_addr)
            .finish()
    }
}

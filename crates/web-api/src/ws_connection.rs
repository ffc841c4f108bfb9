//! WebSocket 会话
//!
//! 每个 socket 一个会话，状态依次为 未认证 → 已认证 → 已关闭：
//! - 未认证：只接受第一条握手消息，超时或失败都回复错误后关闭；
//! - 已认证：准入登记表、发送问候，然后循环分发信封；格式错误的消息
//!   只回复 `error`，不关闭连接；
//! - 已关闭：无论从哪条路径退出，都从登记表移除（移除可重复调用）。
//!
//! 写操作统一由写任务完成，写任务按 FIFO 消费连接的出站队列。

use std::net::SocketAddr;
use std::sync::Arc;

use application::{
    AuthError, AuthenticatedIdentity, ConnectionHandle, Outbound, RelayHub, RouterError,
};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{outgoing, Envelope, HandshakeFailure, HandshakeSuccess};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

type WsSender = SplitSink<WebSocket, WsMessage>;
type WsReceiver = SplitStream<WebSocket>;

/// 握手阶段的失败原因
enum HandshakeOutcome {
    Authenticated(AuthenticatedIdentity),
    /// 已经回复过错误，直接关闭
    Rejected,
    /// 对端在握手前断开
    Disconnected,
}

pub struct ConnectionSession {
    hub: Arc<RelayHub>,
    peer_addr: Option<SocketAddr>,
}

impl ConnectionSession {
    pub fn new(hub: Arc<RelayHub>, peer_addr: Option<SocketAddr>) -> Self {
        Self { hub, peer_addr }
    }

    /// 运行会话直到连接关闭
    pub async fn run(self, socket: WebSocket) {
        let (mut sender, mut incoming) = socket.split();

        let authenticated = match self.handshake(&mut sender, &mut incoming).await {
            HandshakeOutcome::Authenticated(authenticated) => authenticated,
            HandshakeOutcome::Rejected => {
                let _ = sender.send(WsMessage::Close(None)).await;
                return;
            }
            HandshakeOutcome::Disconnected => {
                tracing::debug!(peer = ?self.peer_addr, "握手前连接已断开");
                return;
            }
        };

        let Some((handle, outbound)) = self.admit(&mut sender, authenticated).await else {
            let _ = sender.send(WsMessage::Close(None)).await;
            return;
        };

        let writer = spawn_writer(handle.clone(), sender, outbound);

        if !self.hub.greet(&handle).await {
            tracing::debug!(connection_id = %handle.id(), "问候消息未送达");
        }

        self.read_loop(&handle, &mut incoming).await;

        handle.close();
        self.hub.release(&handle).await;
        if let Err(err) = writer.await {
            tracing::warn!(connection_id = %handle.id(), error = %err, "写任务异常结束");
        }
        tracing::info!(
            connection_id = %handle.id(),
            identity_id = %handle.identity_id(),
            role = %handle.role(),
            "WebSocket连接已断开"
        );
    }

    async fn handshake(&self, sender: &mut WsSender, incoming: &mut WsReceiver) -> HandshakeOutcome {
        let handshake_timeout = self.hub.settings().handshake_timeout;
        let text = match timeout(handshake_timeout, next_text(incoming)).await {
            Ok(Some(text)) => text,
            Ok(None) => return HandshakeOutcome::Disconnected,
            Err(_) => {
                tracing::info!(peer = ?self.peer_addr, "握手超时");
                send_json(sender, &HandshakeFailure::new("Handshake timed out", None)).await;
                return HandshakeOutcome::Rejected;
            }
        };

        match self.hub.gate().authenticate_text(&text).await {
            Ok(authenticated) => HandshakeOutcome::Authenticated(authenticated),
            Err(err) => {
                self.reject(sender, &err).await;
                HandshakeOutcome::Rejected
            }
        }
    }

    async fn reject(&self, sender: &mut WsSender, err: &AuthError) {
        if err.should_back_off() {
            sleep(self.hub.settings().auth_delay.next_delay()).await;
        }
        tracing::info!(peer = ?self.peer_addr, error = %err, "握手失败");
        let failure = HandshakeFailure::new(err.to_string(), err.field().map(str::to_string));
        send_json(sender, &failure).await;
    }

    /// 准入登记表；成功应答在准入前就排进出站队列，保证它先于任何广播
    async fn admit(
        &self,
        sender: &mut WsSender,
        authenticated: AuthenticatedIdentity,
    ) -> Option<(ConnectionHandle, UnboundedReceiver<Outbound>)> {
        let AuthenticatedIdentity { identity, role } = authenticated;
        let reply = HandshakeSuccess::new(
            role,
            identity.id,
            identity.username.clone(),
            self.hub.status(),
        );
        let (handle, outbound) = ConnectionHandle::new(role, identity, self.peer_addr);

        match serde_json::to_string(&reply) {
            Ok(text) => {
                if handle.send_text(Arc::from(text)).is_err() {
                    return None;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "握手应答序列化失败");
                return None;
            }
        }

        match self.hub.admit(handle.clone()).await {
            Ok(()) => {
                tracing::info!(
                    connection_id = %handle.id(),
                    identity_id = %handle.identity_id(),
                    role = %role,
                    "连接已准入"
                );
                Some((handle, outbound))
            }
            Err(err) => {
                tracing::info!(
                    identity_id = %handle.identity_id(),
                    error = %err,
                    "连接准入被拒绝"
                );
                // 队列中的成功应答随接收端一起丢弃
                drop(outbound);
                send_json(sender, &HandshakeFailure::new(err.to_string(), None)).await;
                None
            }
        }
    }

    async fn read_loop(&self, handle: &ConnectionHandle, incoming: &mut WsReceiver) {
        loop {
            tokio::select! {
                _ = handle.closed() => {
                    tracing::debug!(connection_id = %handle.id(), "连接被服务端关闭");
                    break;
                }
                message = incoming.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.handle_text(handle, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        self.reply_error(handle, "Binary messages are not supported");
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!(connection_id = %handle.id(), "客户端关闭连接");
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %handle.id(), error = %err, "读取消息失败");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_text(&self, handle: &ConnectionHandle, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(connection_id = %handle.id(), error = %err, "消息格式错误");
                self.reply_error(handle, &format!("Malformed message: {err}"));
                return;
            }
        };

        let audience = self.hub.audience(handle.role());
        match audience.router.dispatch(handle, envelope).await {
            Ok(Some(reply)) => {
                audience
                    .broadcast
                    .send_to_one(handle, &reply.message_type, reply.data);
            }
            Ok(None) => {}
            Err(RouterError::Handler(err)) => {
                tracing::warn!(connection_id = %handle.id(), error = %err, "消息处理失败");
                self.reply_error(handle, &err.to_string());
            }
            Err(err) => self.reply_error(handle, &err.to_string()),
        }
    }

    fn reply_error(&self, handle: &ConnectionHandle, message: &str) {
        self.hub.audience(handle.role()).broadcast.send_to_one(
            handle,
            outgoing::ERROR,
            json!({ "message": message }),
        );
    }
}

/// 等待下一条文本消息；二进制消息按 UTF-8 解释
async fn next_text(incoming: &mut WsReceiver) -> Option<String> {
    while let Some(message) = incoming.next().await {
        match message {
            Ok(WsMessage::Text(text)) => return Some(text.to_string()),
            Ok(WsMessage::Binary(bytes)) => {
                return Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
            Ok(WsMessage::Close(_)) | Err(_) => return None,
        }
    }
    None
}

async fn send_json<T: Serialize>(sender: &mut WsSender, value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => {
            if let Err(err) = sender.send(WsMessage::Text(text.into())).await {
                tracing::debug!(error = %err, "发送握手应答失败");
            }
        }
        Err(err) => tracing::error!(error = %err, "握手应答序列化失败"),
    }
}

fn spawn_writer(
    handle: ConnectionHandle,
    mut sender: WsSender,
    mut outbound: UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            match command {
                Outbound::Text(text) => {
                    if let Err(err) = sender.send(WsMessage::Text(text.to_string().into())).await {
                        tracing::debug!(connection_id = %handle.id(), error = %err, "发送消息失败");
                        handle.close();
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
        tracing::debug!(connection_id = %handle.id(), "WebSocket发送任务结束");
    })
}

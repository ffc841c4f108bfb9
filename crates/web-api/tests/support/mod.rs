//! 集成测试辅助：用内存协作方启动一个真实的 axum 服务，
//! 再用 tokio-tungstenite 作为客户端连接。

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    MemoryClientLogStore, MemoryIdentityStore, MemoryNotificationSource, MemorySessionStore,
    MemorySnapshotSource, RelayDependencies, RelayHub, RelaySettings, RetryPolicy,
};
use config::AppConfig;
use domain::{Identity, Role, SessionAuthHasher, SessionRecord, Snapshot};
use futures_util::{SinkExt, StreamExt};
use infrastructure::BcryptPasswordVerifier;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const PASSWORD: &str = "hunter2";
pub const SECRET_KEY: &str = "test-secret-key";
pub const STATION_ID: i64 = 1;
pub const ADMIN_ID: i64 = 2;
pub const QUIET_ID: i64 = 3;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestRelay {
    pub addr: SocketAddr,
    pub hub: Arc<RelayHub>,
    pub identities: Arc<MemoryIdentityStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub client_logs: Arc<MemoryClientLogStore>,
    pub snapshots: Arc<MemorySnapshotSource>,
    pub notifications: Arc<MemoryNotificationSource>,
    pub passwords: Arc<BcryptPasswordVerifier>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestRelay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/api", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 为身份写入一个有效会话，返回令牌
    pub async fn issue_session(&self, identity: &Identity, token: &str) -> String {
        let hasher = SessionAuthHasher::new(SECRET_KEY.as_bytes());
        self.sessions
            .insert(
                token,
                SessionRecord {
                    identity_id: identity.id,
                    auth_hash: hasher.hash(identity),
                },
            )
            .await;
        token.to_string()
    }

    /// 等待某类受众的连接数达到期望值
    pub async fn wait_for_count(&self, role: Role, expected: usize) {
        let registry = &self.hub.audience(role).registry;
        timeout(RECV_TIMEOUT, async {
            while registry.count().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry count never reached expected value");
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.hub.shutdown().await;
    }
}

pub async fn station_identity(passwords: &BcryptPasswordVerifier) -> Identity {
    let mut identity = Identity::new(STATION_ID, "station")
        .with_password_hash(passwords.hash(PASSWORD).await.expect("hash"));
    identity.enable_client_logs = true;
    identity
}

pub async fn spawn_relay(configure: impl FnOnce(&mut RelaySettings)) -> TestRelay {
    let mut settings = RelaySettings::from_config(&AppConfig::from_env_with_defaults());
    settings.secret_key = SECRET_KEY.as_bytes().to_vec();
    settings.auth_delay = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5));
    settings.retry = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(20));
    settings.notifications.debounce_window = Duration::from_millis(20);
    settings.handshake_timeout = Duration::from_secs(2);
    configure(&mut settings);

    let passwords = Arc::new(BcryptPasswordVerifier::new(Some(4)));
    let identities = Arc::new(MemoryIdentityStore::new());
    identities.insert(station_identity(&passwords).await).await;
    identities
        .insert(
            Identity::new(ADMIN_ID, "admin")
                .with_password_hash(passwords.hash(PASSWORD).await.expect("hash"))
                .with_superuser(true),
        )
        .await;
    identities
        .insert(
            Identity::new(QUIET_ID, "quiet")
                .with_password_hash(passwords.hash(PASSWORD).await.expect("hash")),
        )
        .await;

    let sessions = Arc::new(MemorySessionStore::new());
    let client_logs = Arc::new(MemoryClientLogStore::new());
    let snapshots = Arc::new(MemorySnapshotSource::new(Snapshot::new(
        json!({"assets": [], "rotators": [], "stopsets": [], "config": {"revision": 1}}),
    )));
    let notifications = Arc::new(MemoryNotificationSource::new());

    let hub = Arc::new(
        RelayHub::new(
            settings,
            RelayDependencies {
                identities: identities.clone(),
                sessions: sessions.clone(),
                passwords: passwords.clone(),
                snapshots: snapshots.clone(),
                client_logs: client_logs.clone(),
                notifications: notifications.clone(),
            },
        )
        .expect("build hub"),
    );
    assert!(hub.start().await, "hub start");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(AppState::new(hub.clone()));

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .ok();
    });

    TestRelay {
        addr,
        hub,
        identities,
        sessions,
        client_logs,
        snapshots,
        notifications,
        passwords,
        shutdown: Some(shutdown_tx),
    }
}

pub async fn connect(relay: &TestRelay) -> WsClient {
    let (ws, _) = connect_async(relay.ws_url()).await.expect("connect websocket");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(TungsteniteMessage::text(value.to_string()))
        .await
        .expect("send");
}

pub async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(TungsteniteMessage::text(text.to_string()))
        .await
        .expect("send");
}

/// 读取下一条 JSON 文本消息；连接关闭时返回 None
pub async fn recv_json(ws: &mut WsClient) -> Option<Value> {
    loop {
        let message = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message");
        match message {
            Some(Ok(TungsteniteMessage::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).expect("json"))
            }
            Some(Ok(TungsteniteMessage::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// 断言服务端关闭了连接
pub async fn expect_closed(ws: &mut WsClient) {
    assert!(recv_json(ws).await.is_none(), "expected connection to close");
}

pub fn password_handshake(role: &str, username: &str, secret: &str, protocol: i64) -> Value {
    json!({
        "protocol_version": protocol,
        "role": role,
        "auth": {"username": username, "secret": secret},
    })
}

pub fn session_handshake(role: &str, token: &str, protocol: i64) -> Value {
    json!({
        "protocol_version": protocol,
        "role": role,
        "auth": {"session_token": token},
    })
}

/// 以普通客户端身份完成握手，返回握手应答和问候快照
pub async fn login_station(relay: &TestRelay) -> (WsClient, Value, Value) {
    let mut ws = connect(relay).await;
    let protocol = relay.hub.settings().protocol_version;
    send_json(&mut ws, password_handshake("regular", "station", PASSWORD, protocol)).await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");
    let greeting = recv_json(&mut ws).await.expect("snapshot greeting");
    (ws, reply, greeting)
}

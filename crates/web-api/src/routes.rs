use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use domain::ServerStatus;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection::ConnectionSession};

#[derive(Debug, Serialize)]
struct ConnectionCounts {
    regular: usize,
    privileged: usize,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    #[serde(flatten)]
    status: ServerStatus,
    connections: ConnectionCounts,
}

/// 需要以 `into_make_service_with_connect_info::<SocketAddr>()` 提供服务，
/// WebSocket 会话依赖对端地址记录客户端日志
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/api", get(websocket_upgrade))
        .route("/api/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner(State(state): State<AppState>) -> String {
    let status = state.hub.status();
    format!(
        "{} {} (protocol v{})\n",
        status.server, status.version, status.protocol
    )
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let (regular, privileged) = state.hub.connection_counts().await;
    Json(StatusBody {
        status: state.hub.status(),
        connections: ConnectionCounts {
            regular,
            privileged,
        },
    })
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let ws = ws?;
    tracing::debug!(peer = %peer_addr, "WebSocket 升级请求");
    let session = ConnectionSession::new(state.hub.clone(), Some(peer_addr));
    Ok(ws.on_upgrade(move |socket| session.run(socket)))
}

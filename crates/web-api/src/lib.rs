//! Web API 层。
//!
//! 提供 Axum 路由：横幅、状态接口以及 `/api` 上的 WebSocket 会话，
//! 会话逻辑委托给应用层的 `RelayHub`。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::ConnectionSession;

//! 消息处理器
//!
//! 普通客户端：`log` 上报播放日志。
//! 管理端：`reload-playlist` 让全部普通客户端重新加载播放列表。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{outgoing, ClientLogRecord, ClientLogStore, INTERNAL_ERROR_LOG_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::broadcast::BroadcastService;
use crate::connection::ConnectionHandle;
use crate::router::{HandlerError, MessageHandler, Reply};

#[derive(Debug, Deserialize)]
struct LogPayload {
    id: Uuid,
    #[serde(rename = "type")]
    log_type: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "created")]
    created_at: Option<String>,
}

/// 客户端日志
///
/// 只有开启了客户端日志的身份才会落库，`internal_error` 类型例外，总是保存。
pub struct ClientLogHandler {
    store: Arc<dyn ClientLogStore>,
}

impl ClientLogHandler {
    pub fn new(store: Arc<dyn ClientLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for ClientLogHandler {
    async fn handle(
        &self,
        connection: &ConnectionHandle,
        data: Value,
    ) -> Result<Option<Reply>, HandlerError> {
        let payload: LogPayload = serde_json::from_value(data)
            .map_err(|err| HandlerError::invalid_payload(err.to_string()))?;
        let identity = connection.identity();

        if !identity.enable_client_logs && payload.log_type != INTERNAL_ERROR_LOG_TYPE {
            info!(
                identity_id = %identity.id,
                log_id = %payload.id,
                log_type = %payload.log_type,
                "ignored client log"
            );
            return Ok(Some(Reply::new(
                outgoing::ACK_LOG,
                json!({"success": true, "id": payload.id, "updated_existing": false, "ignored": true}),
            )));
        }

        let record = ClientLogRecord {
            id: payload.id,
            created_by: identity.id,
            ip_address: connection.peer_addr().map(|addr| addr.ip().to_string()),
            log_type: ClientLogRecord::normalize_type(&payload.log_type),
            description: payload.description,
            created_at: payload.created_at,
        };
        let log_type = record.log_type.clone();
        let created = self.store.upsert(record).await?;

        info!(
            identity_id = %identity.id,
            log_id = %payload.id,
            log_type = %log_type,
            created,
            "acknowledged client log"
        );
        Ok(Some(Reply::new(
            outgoing::ACK_LOG,
            json!({"success": true, "id": payload.id, "updated_existing": !created, "ignored": false}),
        )))
    }
}

/// 管理端请求全部普通客户端重新加载播放列表
pub struct ReloadPlaylistHandler {
    regular: Arc<BroadcastService>,
}

impl ReloadPlaylistHandler {
    pub fn new(regular: Arc<BroadcastService>) -> Self {
        Self { regular }
    }
}

#[async_trait]
impl MessageHandler for ReloadPlaylistHandler {
    async fn handle(
        &self,
        connection: &ConnectionHandle,
        _data: Value,
    ) -> Result<Option<Reply>, HandlerError> {
        let delivered = self
            .regular
            .broadcast_all(outgoing::RELOAD_PLAYLIST, Value::Null)
            .await;
        info!(
            identity_id = %connection.identity_id(),
            delivered,
            "管理端请求重新加载播放列表"
        );
        Ok(Some(Reply::new(
            outgoing::RELOAD_PLAYLIST,
            json!({"success": true}),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClientLogStore;
    use crate::registry::ConnectionRegistry;
    use domain::{Identity, Role};

    fn log_connection(enable_client_logs: bool) -> ConnectionHandle {
        let mut identity = Identity::new(1, "dj");
        identity.enable_client_logs = enable_client_logs;
        let addr = "10.0.0.5:4000".parse().ok();
        ConnectionHandle::new(Role::Regular, identity, addr).0
    }

    #[tokio::test]
    async fn test_log_stored_and_updated() {
        let store = Arc::new(MemoryClientLogStore::new());
        let handler = ClientLogHandler::new(store.clone());
        let conn = log_connection(true);
        let id = Uuid::new_v4();
        let data = json!({"id": id, "type": "played_asset", "description": "song"});

        let reply = handler.handle(&conn, data.clone()).await.unwrap().unwrap();
        assert_eq!(reply.message_type, "ack-log");
        assert_eq!(reply.data["updated_existing"], json!(false));
        assert_eq!(reply.data["ignored"], json!(false));

        let reply = handler.handle(&conn, data).await.unwrap().unwrap();
        assert_eq!(reply.data["updated_existing"], json!(true));

        let record = store.get(id).await.unwrap();
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.log_type, "played_asset");
    }

    #[tokio::test]
    async fn test_log_ignored_when_disabled_except_internal_error() {
        let store = Arc::new(MemoryClientLogStore::new());
        let handler = ClientLogHandler::new(store.clone());
        let conn = log_connection(false);

        let reply = handler
            .handle(&conn, json!({"id": Uuid::new_v4(), "type": "waited"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.data["ignored"], json!(true));
        assert!(store.is_empty().await);

        let reply = handler
            .handle(&conn, json!({"id": Uuid::new_v4(), "type": "internal_error"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.data["ignored"], json!(false));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_log_type_stored_as_unspecified() {
        let store = Arc::new(MemoryClientLogStore::new());
        let handler = ClientLogHandler::new(store.clone());
        let id = Uuid::new_v4();
        handler
            .handle(&log_connection(true), json!({"id": id, "type": "mystery"}))
            .await
            .unwrap();
        assert_eq!(store.get(id).await.unwrap().log_type, "unspecified");
    }

    #[tokio::test]
    async fn test_malformed_log_payload() {
        let handler = ClientLogHandler::new(Arc::new(MemoryClientLogStore::new()));
        let result = handler
            .handle(&log_connection(true), json!({"type": "waited"}))
            .await;
        assert!(matches!(result, Err(HandlerError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_reload_playlist_broadcasts_to_regular_clients() {
        let registry = Arc::new(ConnectionRegistry::new(Role::Regular));
        let (client, mut client_rx) =
            ConnectionHandle::new(Role::Regular, Identity::new(2, "client"), None);
        registry.admit(client).await.unwrap();
        let handler = ReloadPlaylistHandler::new(Arc::new(BroadcastService::new(registry)));

        let admin = ConnectionHandle::new(
            Role::Privileged,
            Identity::new(1, "admin").with_superuser(true),
            None,
        )
        .0;
        let reply = handler.handle(&admin, Value::Null).await.unwrap().unwrap();
        assert_eq!(reply, Reply::new("reload-playlist", json!({"success": true})));
        assert!(client_rx.try_recv().is_ok());
    }
}

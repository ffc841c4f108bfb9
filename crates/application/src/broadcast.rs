//! 广播服务
//!
//! 消息只序列化一次，然后逐个写入连接的出站队列。单个连接发送失败
//! 只记录日志，不影响其余连接；返回成功投递的连接数。

use std::sync::Arc;

use domain::{DomainResult, Envelope, IdentityId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::registry::ConnectionRegistry;

pub struct BroadcastService {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 编码 `{"type", "data"}` 信封
    pub fn encode(message_type: &str, data: Value) -> DomainResult<Arc<str>> {
        Ok(Arc::from(Envelope::new(message_type, data).to_json()?))
    }

    /// 发送给登记表中的全部连接
    pub async fn broadcast_all(&self, message_type: &str, data: Value) -> usize {
        let connections = self.registry.all().await;
        self.fan_out(message_type, data, &connections)
    }

    /// 发送给某个身份的全部连接
    pub async fn send_to_identity(
        &self,
        identity_id: IdentityId,
        message_type: &str,
        data: Value,
    ) -> usize {
        let connections = self.registry.connections_for(identity_id).await;
        self.fan_out(message_type, data, &connections)
    }

    /// 发送给单个连接，失败时只记录日志
    pub fn send_to_one(&self, connection: &ConnectionHandle, message_type: &str, data: Value) -> bool {
        match Self::encode(message_type, data) {
            Ok(text) => Self::deliver(connection, message_type, text),
            Err(err) => {
                warn!(message_type, error = %err, "消息序列化失败");
                false
            }
        }
    }

    fn fan_out(&self, message_type: &str, data: Value, connections: &[ConnectionHandle]) -> usize {
        let text = match Self::encode(message_type, data) {
            Ok(text) => text,
            Err(err) => {
                warn!(message_type, error = %err, "消息序列化失败");
                return 0;
            }
        };

        let delivered = connections
            .iter()
            .filter(|connection| Self::deliver(connection, message_type, text.clone()))
            .count();

        debug!(
            role = %self.registry.role(),
            message_type,
            delivered,
            targets = connections.len(),
            "broadcast finished"
        );
        delivered
    }

    fn deliver(connection: &ConnectionHandle, message_type: &str, text: Arc<str>) -> bool {
        match connection.send_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    connection_id = %connection.id(),
                    message_type,
                    error = %err,
                    "failed to deliver message to connection"
                );
                false
            }
        }
    }
}

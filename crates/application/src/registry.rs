//! 连接登记表
//!
//! 每类受众（管理端 / 普通客户端）各一张表。`connections` 和 `by_identity`
//! 放在同一把锁下，准入和移除对其他操作都是原子的；身份桶变空时立即删除。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use domain::{ConnectionId, Identity, IdentityId, Role};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("identity {identity_id} is already connected")]
    AlreadyConnected { identity_id: IdentityId },
    #[error("connection {0} is already admitted")]
    DuplicateConnection(ConnectionId),
    #[error("{actual} connection cannot join the {expected} registry")]
    RoleMismatch { expected: Role, actual: Role },
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    by_identity: HashMap<IdentityId, HashSet<ConnectionId>>,
}

/// 连接登记表
pub struct ConnectionRegistry {
    role: Role,
    state: RwLock<RegistryState>,
    single_login: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: RwLock::new(RegistryState::default()),
            single_login: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 单点登录开关，仅对普通客户端生效
    pub fn set_single_login(&self, enabled: bool) {
        self.single_login.store(enabled, Ordering::SeqCst);
    }

    pub fn single_login(&self) -> bool {
        self.single_login.load(Ordering::SeqCst)
    }

    /// 准入一个已认证的连接
    pub async fn admit(&self, handle: ConnectionHandle) -> Result<(), AdmissionError> {
        if handle.role() != self.role {
            return Err(AdmissionError::RoleMismatch {
                expected: self.role,
                actual: handle.role(),
            });
        }

        let connection_id = handle.id();
        let identity_id = handle.identity_id();
        let mut state = self.state.write().await;

        if state.connections.contains_key(&connection_id) {
            return Err(AdmissionError::DuplicateConnection(connection_id));
        }

        if self.role == Role::Regular
            && self.single_login()
            && state.by_identity.contains_key(&identity_id)
        {
            info!(
                identity_id = %identity_id,
                "单点登录策略拒绝了重复连接"
            );
            return Err(AdmissionError::AlreadyConnected { identity_id });
        }

        state.connections.insert(connection_id, handle);
        state
            .by_identity
            .entry(identity_id)
            .or_default()
            .insert(connection_id);

        info!(
            role = %self.role,
            connection_id = %connection_id,
            identity_id = %identity_id,
            total = state.connections.len(),
            "连接已登记"
        );
        Ok(())
    }

    /// 移除连接；重复移除是无害的，返回本次是否真正删除了记录
    pub async fn remove(&self, connection_id: &ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let Some(handle) = state.connections.remove(connection_id) else {
            debug!(connection_id = %connection_id, "连接已不在登记表中");
            return false;
        };

        let identity_id = handle.identity_id();
        if let Some(bucket) = state.by_identity.get_mut(&identity_id) {
            bucket.remove(connection_id);
            if bucket.is_empty() {
                state.by_identity.remove(&identity_id);
            }
        }

        info!(
            role = %self.role,
            connection_id = %connection_id,
            identity_id = %identity_id,
            total = state.connections.len(),
            "连接已注销"
        );
        true
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(connection_id)
    }

    /// 某个身份的全部连接（拷贝）
    pub async fn connections_for(&self, identity_id: IdentityId) -> Vec<ConnectionHandle> {
        let state = self.state.read().await;
        state
            .by_identity
            .get(&identity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 全部连接（拷贝），遍历期间不持有锁
    pub async fn all(&self) -> Vec<ConnectionHandle> {
        self.state.read().await.connections.values().cloned().collect()
    }

    /// 当前有连接的身份
    pub async fn identities(&self) -> Vec<IdentityId> {
        self.state.read().await.by_identity.keys().copied().collect()
    }

    /// 用最新的身份信息刷新该身份的全部连接，返回刷新的连接数
    pub async fn refresh_identity(&self, identity: &Identity) -> usize {
        let connections = self.connections_for(identity.id).await;
        for connection in &connections {
            connection.set_identity(identity.clone());
        }
        debug!(
            role = %self.role,
            identity_id = %identity.id,
            count = connections.len(),
            "连接身份信息已刷新"
        );
        connections.len()
    }
}

//! 认证网关
//!
//! 握手处理顺序：先校验协议版本（不匹配立即失败，不延迟），再解析凭据。
//! 凭据可以是用户名+密码，也可以是会话令牌。任何查找失败、身份未激活、
//! 角色权限不足都返回同一个"用户名或密码错误"，不透露具体原因；
//! 这类失败要求调用方在回复前随机延迟，以减缓暴力猜测。

use std::sync::Arc;

use domain::{
    Credentials, HandshakeRequest, Identity, IdentityStore, Role, SessionAuthHasher, SessionStore,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::password::PasswordVerifier;

/// 凭据错误时回复里标记的字段
pub const CREDENTIALS_FIELD: &str = "userpass";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),
    #[error("{message}")]
    ProtocolMismatch {
        client: i64,
        server: i64,
        message: String,
    },
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Authentication is temporarily unavailable")]
    Backend(String),
}

impl AuthError {
    /// 根据客户端和服务端的协议版本生成带方向的提示
    pub fn protocol_mismatch(client: i64, server: i64) -> Self {
        let message = if client > server {
            format!(
                "Server running an older protocol (v{server}) than the client (v{client}). \
                 You'll need to downgrade your client."
            )
        } else {
            format!(
                "Client running an older protocol (v{client}) than the server (v{server}). \
                 You'll need to upgrade your client, the server cannot downgrade."
            )
        };
        AuthError::ProtocolMismatch {
            client,
            server,
            message,
        }
    }

    /// 凭据类失败需要在回复前退避
    pub fn should_back_off(&self) -> bool {
        matches!(self, AuthError::InvalidCredentials)
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidCredentials => Some(CREDENTIALS_FIELD),
            _ => None,
        }
    }
}

/// 认证成功的结果
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedIdentity {
    pub identity: Identity,
    pub role: Role,
}

pub struct AuthenticationGate {
    protocol_version: i64,
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    passwords: Arc<dyn PasswordVerifier>,
    session_hasher: SessionAuthHasher,
}

impl AuthenticationGate {
    pub fn new(
        protocol_version: i64,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        passwords: Arc<dyn PasswordVerifier>,
        session_hasher: SessionAuthHasher,
    ) -> Self {
        Self {
            protocol_version,
            identities,
            sessions,
            passwords,
            session_hasher,
        }
    }

    pub fn protocol_version(&self) -> i64 {
        self.protocol_version
    }

    /// 处理原始握手文本
    pub async fn authenticate_text(&self, text: &str) -> Result<AuthenticatedIdentity, AuthError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| AuthError::InvalidHandshake(err.to_string()))?;

        // 版本字段先于其余字段校验，客户端总能拿到明确的升级/降级提示
        let client_version = value
            .get("protocol_version")
            .and_then(Value::as_i64)
            .ok_or_else(|| AuthError::InvalidHandshake("missing protocol_version".to_string()))?;
        self.check_protocol(client_version)?;

        let request: HandshakeRequest = serde_json::from_value(value)
            .map_err(|err| AuthError::InvalidHandshake(err.to_string()))?;
        self.authenticate(&request).await
    }

    pub async fn authenticate(
        &self,
        request: &HandshakeRequest,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        self.check_protocol(request.protocol_version)?;

        let identity = match &request.auth {
            Credentials::Password { username, secret } => {
                self.identity_from_password(username, secret).await?
            }
            Credentials::Session { session_token } => {
                self.identity_from_session(session_token).await?
            }
        };

        let Some(identity) = identity else {
            warn!(role = %request.role, "认证失败：凭据无效");
            return Err(AuthError::InvalidCredentials);
        };

        if !identity.can_use(request.role) {
            warn!(
                identity_id = %identity.id,
                role = %request.role,
                "认证失败：身份未激活或权限不足"
            );
            return Err(AuthError::InvalidCredentials);
        }

        info!(identity_id = %identity.id, role = %request.role, "认证成功");
        Ok(AuthenticatedIdentity {
            identity,
            role: request.role,
        })
    }

    fn check_protocol(&self, client_version: i64) -> Result<(), AuthError> {
        if client_version == self.protocol_version {
            return Ok(());
        }
        info!(
            client_version,
            server_version = self.protocol_version,
            "协议版本不匹配"
        );
        Err(AuthError::protocol_mismatch(
            client_version,
            self.protocol_version,
        ))
    }

    async fn identity_from_password(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Option<Identity>, AuthError> {
        let identity = self
            .identities
            .find_by_username(username)
            .await
            .map_err(|err| AuthError::Backend(err.to_string()))?;
        let Some(identity) = identity else {
            return Ok(None);
        };

        let valid = self
            .passwords
            .verify(secret, &identity.password_hash)
            .await
            .map_err(|err| AuthError::Backend(err.to_string()))?;
        Ok(valid.then_some(identity))
    }

    async fn identity_from_session(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let record = self
            .sessions
            .get(token)
            .await
            .map_err(|err| AuthError::Backend(err.to_string()))?;
        let Some(record) = record else {
            return Ok(None);
        };

        let identity = self
            .identities
            .find_by_id(record.identity_id)
            .await
            .map_err(|err| AuthError::Backend(err.to_string()))?;
        let Some(identity) = identity else {
            return Ok(None);
        };

        // 密码修改后旧会话的校验值失效
        if !self.session_hasher.verify(&identity, &record.auth_hash) {
            warn!(identity_id = %identity.id, "会话校验值不匹配");
            return Ok(None);
        }
        Ok(Some(identity))
    }
}

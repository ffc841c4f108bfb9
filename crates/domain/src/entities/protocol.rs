//! WebSocket 协议消息定义
//!
//! 握手（仅第一条客户端消息）、握手应答以及稳态阶段双向使用的
//! `{"type", "data"}` 信封。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::connection::Role;
use super::identity::IdentityId;
use crate::errors::DomainResult;

/// 服务端发出的消息类型
pub mod outgoing {
    pub const DATA: &str = "data";
    pub const HELLO: &str = "hello";
    pub const ACK_LOG: &str = "ack-log";
    pub const RELOAD_PLAYLIST: &str = "reload-playlist";
    pub const ERROR: &str = "error";
}

/// 客户端发出的消息类型
pub mod incoming {
    pub const LOG: &str = "log";
    pub const RELOAD_PLAYLIST: &str = "reload-playlist";

    /// 普通客户端可发送的消息类型
    pub const REGULAR: &[&str] = &[LOG];
    /// 管理端可发送的消息类型
    pub const PRIVILEGED: &[&str] = &[RELOAD_PLAYLIST];
}

/// 握手凭据
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    /// 用户名 + 密码
    Password { username: String, secret: String },
    /// 已登录会话的令牌
    Session { session_token: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("secret", &"***")
                .finish(),
            Credentials::Session { .. } => f
                .debug_struct("Session")
                .field("session_token", &"***")
                .finish(),
        }
    }
}

/// 握手请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol_version: i64,
    pub role: Role,
    pub auth: Credentials,
}

impl HandshakeRequest {
    pub fn from_json(text: &str) -> DomainResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// 服务端状态信息，随握手成功应答及状态接口一起返回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub server: String,
    pub version: String,
    pub protocol: i64,
}

/// 握手成功应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeSuccess {
    pub success: bool,
    pub role: Role,
    pub identity: IdentityId,
    pub username: String,
    #[serde(flatten)]
    pub status: ServerStatus,
}

impl HandshakeSuccess {
    pub fn new(role: Role, identity: IdentityId, username: String, status: ServerStatus) -> Self {
        Self {
            success: true,
            role,
            identity,
            username,
            status,
        }
    }
}

/// 握手失败应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeFailure {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
}

impl HandshakeFailure {
    pub fn new(error: impl Into<String>, field: Option<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            field,
        }
    }
}

/// 稳态消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }

    pub fn from_json(text: &str) -> DomainResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> DomainResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

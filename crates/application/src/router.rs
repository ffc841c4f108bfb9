//! 消息路由
//!
//! 每类连接在启动时用一张"消息类型 → 处理器"表构建路由器。构建时校验
//! 表的完整性：声明的类型必须都有处理器，处理器也不能注册未声明的类型，
//! 否则启动直接失败。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{DomainError, Envelope, Role};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::connection::ConnectionHandle;

/// 处理器返回的回复，发回同一个连接
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message_type: String,
    pub data: Value,
}

impl Reply {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl HandlerError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no handler registered for {role} message type {message_type}")]
    MissingHandler { role: Role, message_type: String },
    #[error("handler registered for undeclared {role} message type {message_type}")]
    UndeclaredHandler { role: Role, message_type: String },
    #[error("unknown {role} message type: {message_type}")]
    UnknownType { role: Role, message_type: String },
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        connection: &ConnectionHandle,
        data: Value,
    ) -> Result<Option<Reply>, HandlerError>;
}

pub struct MessageRouter {
    role: Role,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn builder(role: Role, declared: &[&str]) -> MessageRouterBuilder {
        MessageRouterBuilder {
            role,
            declared: declared.iter().map(|t| t.to_string()).collect(),
            handlers: HashMap::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn supports(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub async fn dispatch(
        &self,
        connection: &ConnectionHandle,
        envelope: Envelope,
    ) -> Result<Option<Reply>, RouterError> {
        let Some(handler) = self.handlers.get(&envelope.message_type) else {
            error!(
                role = %self.role,
                connection_id = %connection.id(),
                message_type = %envelope.message_type,
                "收到未声明的消息类型"
            );
            return Err(RouterError::UnknownType {
                role: self.role,
                message_type: envelope.message_type,
            });
        };

        debug!(
            connection_id = %connection.id(),
            message_type = %envelope.message_type,
            "分发消息"
        );
        Ok(handler.handle(connection, envelope.data).await?)
    }
}

pub struct MessageRouterBuilder {
    role: Role,
    declared: Vec<String>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageRouterBuilder {
    pub fn handler(mut self, message_type: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(message_type.to_string(), handler);
        self
    }

    pub fn build(self) -> Result<MessageRouter, RouterError> {
        if let Some(message_type) = self
            .handlers
            .keys()
            .find(|message_type| !self.declared.contains(message_type))
        {
            return Err(RouterError::UndeclaredHandler {
                role: self.role,
                message_type: message_type.clone(),
            });
        }
        if let Some(message_type) = self
            .declared
            .iter()
            .find(|message_type| !self.handlers.contains_key(*message_type))
        {
            return Err(RouterError::MissingHandler {
                role: self.role,
                message_type: message_type.clone(),
            });
        }

        Ok(MessageRouter {
            role: self.role,
            handlers: self.handlers,
        })
    }
}

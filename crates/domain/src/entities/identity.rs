//! 身份实体定义
//!
//! 身份对应外部存储中的用户账号，本系统只读取，不负责持久化。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::connection::Role;

/// 身份ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl From<i64> for IdentityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 身份实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// 身份唯一ID
    pub id: IdentityId,
    /// 用户名（唯一）
    pub username: String,
    /// 密码哈希（敏感信息，不在序列化中包含）
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// 是否启用
    pub is_active: bool,
    /// 是否具备管理权限
    pub is_superuser: bool,
    /// 是否记录客户端日志
    pub enable_client_logs: bool,
}

impl Identity {
    /// 创建一个启用状态的普通身份
    pub fn new(id: impl Into<IdentityId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            password_hash: String::new(),
            is_active: true,
            is_superuser: false,
            enable_client_logs: false,
        }
    }

    pub fn with_password_hash(mut self, password_hash: impl Into<String>) -> Self {
        self.password_hash = password_hash.into();
        self
    }

    pub fn with_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    /// 判断身份是否允许以指定角色连接
    pub fn can_use(&self, role: Role) -> bool {
        match role {
            Role::Regular => self.is_active,
            Role::Privileged => self.is_active && self.is_superuser,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.username, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_eligibility() {
        let mut identity = Identity::new(1, "dj");
        assert!(identity.can_use(Role::Regular));
        assert!(!identity.can_use(Role::Privileged));

        identity.is_superuser = true;
        assert!(identity.can_use(Role::Privileged));

        identity.is_active = false;
        assert!(!identity.can_use(Role::Regular));
        assert!(!identity.can_use(Role::Privileged));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let identity = Identity::new(7, "dj").with_password_hash("$2b$12$secret");
        let json = serde_json::to_value(&identity).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["id"], 7);
    }
}

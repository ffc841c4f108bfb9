//! 会话校验值服务
//!
//! 会话在登录时记录 `HMAC-SHA256(secret_key, password_hash)`。
//! 修改密码后密码哈希改变，旧会话的校验值随之失效。

use data_encoding::BASE64;
use ring::hmac;

use crate::entities::Identity;

pub struct SessionAuthHasher {
    key: hmac::Key,
}

impl SessionAuthHasher {
    pub fn new(secret_key: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret_key),
        }
    }

    /// 计算身份当前的会话校验值（base64）
    pub fn hash(&self, identity: &Identity) -> String {
        let tag = hmac::sign(&self.key, identity.password_hash.as_bytes());
        BASE64.encode(tag.as_ref())
    }

    /// 常量时间比较会话记录中的校验值
    pub fn verify(&self, identity: &Identity, stored_hash: &str) -> bool {
        let Ok(tag) = BASE64.decode(stored_hash.as_bytes()) else {
            return false;
        };
        hmac::verify(&self.key, identity.password_hash.as_bytes(), &tag).is_ok()
    }
}

impl std::fmt::Debug for SessionAuthHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthHasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verifies() {
        let hasher = SessionAuthHasher::new(b"secret");
        let identity = Identity::new(1, "dj").with_password_hash("hash-a");
        let stored = hasher.hash(&identity);
        assert!(hasher.verify(&identity, &stored));
    }

    #[test]
    fn test_password_change_invalidates() {
        let hasher = SessionAuthHasher::new(b"secret");
        let identity = Identity::new(1, "dj").with_password_hash("hash-a");
        let stored = hasher.hash(&identity);

        let changed = identity.with_password_hash("hash-b");
        assert!(!hasher.verify(&changed, &stored));
    }

    #[test]
    fn test_different_secret_rejected() {
        let identity = Identity::new(1, "dj").with_password_hash("hash-a");
        let stored = SessionAuthHasher::new(b"one").hash(&identity);
        assert!(!SessionAuthHasher::new(b"two").verify(&identity, &stored));
        assert!(!SessionAuthHasher::new(b"one").verify(&identity, "%%not-base64%%"));
    }
}

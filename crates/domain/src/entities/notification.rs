//! 变更通知实体
//!
//! 外部生产者通过 pub/sub 频道发布的通知。线路格式为 JSON 数组，
//! 元素可以是裸类型字符串，也可以是 `[类型, 负载]` 二元组；
//! 为兼容旧生产者，也接受单个 `{"type", "data"}` 对象。
//!
//! 批内各元素独立解码，坏元素不影响同批的其它通知。

use serde::Deserialize;
use serde_json::Value;

use super::identity::IdentityId;
use crate::errors::{DomainError, DomainResult};

/// 通知类型名称
pub mod kinds {
    pub const DATA_CHANGED: &str = "data-changed";
    pub const FORCE_REFRESH: &str = "force-refresh";
    pub const LOGOUT: &str = "logout";
    pub const IDENTITY_CHANGED: &str = "identity-changed";
    pub const RELOAD_PLAYLIST: &str = "reload-playlist";
}

/// 待处理的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingNotification {
    /// 数据可能已变化，快照不同时才广播
    DataChanged,
    /// 无论快照是否变化都广播
    ForceRefresh,
    /// 立即断开这些身份的连接
    Logout {
        identity_ids: Vec<IdentityId>,
        privileged_only: bool,
    },
    /// 身份信息变化，需要重新校验；改过密码时断开全部连接
    IdentityChanged {
        identity_id: IdentityId,
        password_change: bool,
    },
    /// 通知客户端重新加载播放列表，`None` 表示全部客户端
    ReloadPlaylist { identity_id: Option<IdentityId> },
}

impl PendingNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingNotification::DataChanged => kinds::DATA_CHANGED,
            PendingNotification::ForceRefresh => kinds::FORCE_REFRESH,
            PendingNotification::Logout { .. } => kinds::LOGOUT,
            PendingNotification::IdentityChanged { .. } => kinds::IDENTITY_CHANGED,
            PendingNotification::ReloadPlaylist { .. } => kinds::RELOAD_PLAYLIST,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireItem {
    Bare(String),
    Pair(String, Value),
}

#[derive(Deserialize)]
struct WireObject {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBatch {
    Batch(Vec<Value>),
    Single(WireObject),
}

#[derive(Deserialize, Default)]
struct DataChangedPayload {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct LogoutPayload {
    user_ids: Vec<i64>,
    #[serde(default)]
    admin_only: bool,
}

#[derive(Deserialize)]
struct IdentityChangedPayload {
    user_id: i64,
    #[serde(default)]
    password_change: bool,
}

#[derive(Deserialize, Default)]
struct ReloadPlaylistPayload {
    #[serde(default)]
    user_id: Option<i64>,
}

fn payload_or_default<T>(data: Value) -> DomainResult<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if data.is_null() {
        Ok(T::default())
    } else {
        Ok(serde_json::from_value(data)?)
    }
}

fn decode_item(message_type: &str, data: Value) -> DomainResult<PendingNotification> {
    match message_type {
        kinds::DATA_CHANGED => {
            let payload: DataChangedPayload = payload_or_default(data)?;
            Ok(if payload.force {
                PendingNotification::ForceRefresh
            } else {
                PendingNotification::DataChanged
            })
        }
        kinds::FORCE_REFRESH => Ok(PendingNotification::ForceRefresh),
        kinds::LOGOUT => {
            let payload: LogoutPayload = serde_json::from_value(data)?;
            Ok(PendingNotification::Logout {
                identity_ids: payload.user_ids.into_iter().map(IdentityId).collect(),
                privileged_only: payload.admin_only,
            })
        }
        kinds::IDENTITY_CHANGED => {
            let payload: IdentityChangedPayload = serde_json::from_value(data)?;
            Ok(PendingNotification::IdentityChanged {
                identity_id: IdentityId(payload.user_id),
                password_change: payload.password_change,
            })
        }
        kinds::RELOAD_PLAYLIST => {
            let payload: ReloadPlaylistPayload = payload_or_default(data)?;
            Ok(PendingNotification::ReloadPlaylist {
                identity_id: payload.user_id.map(IdentityId),
            })
        }
        other => Err(DomainError::protocol_error(format!(
            "unknown notification type: {other:?}"
        ))),
    }
}

/// 一条负载的解析结果
#[derive(Debug, Default)]
pub struct NotificationBatch {
    pub notifications: Vec<PendingNotification>,
    /// 无法解码的元素，调用方记录后跳过
    pub rejected: Vec<DomainError>,
}

fn decode_wire_item(item: Value) -> DomainResult<PendingNotification> {
    let item: WireItem = serde_json::from_value(item)?;
    match item {
        WireItem::Bare(message_type) => decode_item(&message_type, Value::Null),
        WireItem::Pair(message_type, data) => decode_item(&message_type, data),
    }
}

/// 解析一条 pub/sub 负载
///
/// 只有外层不是合法 JSON 数组或对象时才返回错误。
pub fn parse_notifications(payload: &str) -> DomainResult<NotificationBatch> {
    let mut batch = NotificationBatch::default();
    let wire: WireBatch = serde_json::from_str(payload)?;
    let items = match wire {
        WireBatch::Batch(items) => items.into_iter().map(decode_wire_item).collect::<Vec<_>>(),
        WireBatch::Single(object) => vec![decode_item(&object.message_type, object.data)],
    };
    for item in items {
        match item {
            Ok(notification) => batch.notifications.push(notification),
            Err(err) => batch.rejected.push(err),
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(payload: &str) -> Vec<PendingNotification> {
        let batch = parse_notifications(payload).unwrap();
        assert!(batch.rejected.is_empty(), "{:?}", batch.rejected);
        batch.notifications
    }

    #[test]
    fn test_parse_bare_and_pairs() {
        let parsed = parse_ok(
            r#"["data-changed", ["data-changed", {"force": true}], ["logout", {"user_ids": [4, 5], "admin_only": true}]]"#,
        );
        assert_eq!(
            parsed,
            vec![
                PendingNotification::DataChanged,
                PendingNotification::ForceRefresh,
                PendingNotification::Logout {
                    identity_ids: vec![IdentityId(4), IdentityId(5)],
                    privileged_only: true,
                },
            ]
        );
    }

    #[test]
    fn test_parse_single_object() {
        let parsed = parse_ok(r#"{"type": "reload-playlist", "data": {"user_id": 9}}"#);
        assert_eq!(
            parsed,
            vec![PendingNotification::ReloadPlaylist {
                identity_id: Some(IdentityId(9))
            }]
        );
    }

    #[test]
    fn test_reload_playlist_without_payload_targets_everyone() {
        let parsed = parse_ok(r#"["reload-playlist"]"#);
        assert_eq!(
            parsed,
            vec![PendingNotification::ReloadPlaylist { identity_id: None }]
        );
    }

    #[test]
    fn test_identity_changed_password_flag_defaults_to_false() {
        let parsed = parse_ok(
            r#"[["identity-changed", {"user_id": 1}], ["identity-changed", {"user_id": 2, "password_change": true}]]"#,
        );
        assert_eq!(
            parsed,
            vec![
                PendingNotification::IdentityChanged {
                    identity_id: IdentityId(1),
                    password_change: false,
                },
                PendingNotification::IdentityChanged {
                    identity_id: IdentityId(2),
                    password_change: true,
                },
            ]
        );
    }

    #[test]
    fn test_logout_requires_user_ids() {
        let batch = parse_notifications(r#"["logout"]"#).unwrap();
        assert!(batch.notifications.is_empty());
        assert_eq!(batch.rejected.len(), 1);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let batch = parse_notifications(r#"["explode"]"#).unwrap();
        assert!(batch.notifications.is_empty());
        assert!(matches!(
            batch.rejected.as_slice(),
            [DomainError::ProtocolError { .. }]
        ));
        assert!(parse_notifications("garbage").is_err());
        assert!(parse_notifications("42").is_err());
    }

    #[test]
    fn test_bad_items_do_not_drop_the_rest_of_the_batch() {
        let batch = parse_notifications(
            r#"[["logout", {"user_ids": [7], "admin_only": false}], "db-changes-force", 42, ["logout", "oops"], "data-changed"]"#,
        )
        .unwrap();
        assert_eq!(
            batch.notifications,
            vec![
                PendingNotification::Logout {
                    identity_ids: vec![IdentityId(7)],
                    privileged_only: false,
                },
                PendingNotification::DataChanged,
            ]
        );
        assert_eq!(batch.rejected.len(), 3);
    }
}

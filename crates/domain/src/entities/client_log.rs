//! 客户端日志记录
//!
//! 普通客户端上报的播放日志，由外部存储持久化。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::IdentityId;

/// 可识别的日志类型，其他类型存为 `unspecified`
pub const CLIENT_LOG_TYPES: &[&str] = &[
    "played_asset",
    "played_part_stopset",
    "played_stopset",
    "skipped_asset",
    "skipped_stopset",
    "waited",
    "internal_error",
];

pub const UNSPECIFIED_LOG_TYPE: &str = "unspecified";
pub const INTERNAL_ERROR_LOG_TYPE: &str = "internal_error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientLogRecord {
    /// 客户端生成的日志ID，重复上报时用于覆盖
    pub id: Uuid,
    pub created_by: IdentityId,
    pub ip_address: Option<String>,
    #[serde(rename = "type")]
    pub log_type: String,
    #[serde(default)]
    pub description: String,
    /// 客户端提供的时间戳，原样保存
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ClientLogRecord {
    /// 未知类型统一归为 `unspecified`
    pub fn normalize_type(log_type: &str) -> String {
        if CLIENT_LOG_TYPES.contains(&log_type) {
            log_type.to_string()
        } else {
            UNSPECIFIED_LOG_TYPE.to_string()
        }
    }
}

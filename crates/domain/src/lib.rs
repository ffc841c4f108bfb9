//! 状态同步中继的核心领域模型
//!
//! 包含身份、连接角色、快照、握手/消息协议以及变更通知等实体，
//! 以及外部协作方（身份存储、会话存储、快照来源、日志存储）的接口。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod services;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use services::*;

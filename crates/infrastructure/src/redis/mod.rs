//! Redis 适配器
//!
//! 变更通知订阅和会话存储。

pub mod error;
pub mod session_store;
pub mod subscriber;

// 重新导出
pub use error::*;
pub use session_store::*;
pub use subscriber::*;

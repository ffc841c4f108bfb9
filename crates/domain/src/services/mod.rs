//! 领域服务

pub mod session_auth;

pub use session_auth::SessionAuthHasher;

//! Data models shared across storage access and API handlers.

pub mod audit;
pub mod quota;
pub mod session;
pub mod write_key;

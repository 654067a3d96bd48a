pub mod exchange;
pub mod maintenance;
pub mod quota;
pub mod session;
pub mod transient;
pub mod usage;
pub mod write_keys;

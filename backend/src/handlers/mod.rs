pub mod admin;
pub mod health;
pub mod quota;
pub mod sessions;

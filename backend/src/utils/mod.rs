pub mod jwt;
pub mod security;
pub mod time;

pub use jwt::*;
pub use security::*;
pub use time::*;

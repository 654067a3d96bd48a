pub mod audit_event;
pub mod memory;
pub mod quota;
pub mod session;
pub mod write_key;

pub use audit_event::{AuditSink, PgAuditSink};
pub use memory::{MemoryAuditSink, MemoryQuotaStore, MemorySessionStore, MemoryWriteKeyStore};
pub use quota::{PgQuotaStore, QuotaStore};
pub use session::{PgSessionStore, SessionStore};
pub use write_key::{PgWriteKeyStore, WriteKeyStore};

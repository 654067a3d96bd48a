pub mod connection;
pub mod redis;
pub mod tenant;
pub mod tenant_memory;
pub mod tenant_postgres;

pub use tenant::{IsolationProbe, ScopeBackend, TenantGuard, TenantScope, UnitOfWork};
pub use tenant_memory::{GovernedRowsTable, MemoryScopeBackend};
pub use tenant_postgres::PgScopeBackend;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    db::{
        connection::DbPool, redis::RedisPool, GovernedRowsTable, IsolationProbe,
        MemoryScopeBackend, PgScopeBackend, ScopeBackend, TenantGuard,
    },
    repositories::{
        AuditSink, MemoryAuditSink, MemoryQuotaStore, MemorySessionStore, MemoryWriteKeyStore,
        PgAuditSink, PgQuotaStore, PgSessionStore, PgWriteKeyStore, QuotaStore, SessionStore,
        WriteKeyStore,
    },
    services::{
        exchange::ExchangeCodeService,
        quota::QuotaService,
        session::{SessionService, SessionSettings},
        transient::{MemoryTransientStore, RedisTransientStore, TransientStore},
        usage::ScopedUsageCounter,
        write_keys::WriteKeyService,
    },
    utils::time::Clock,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionService>,
    pub quotas: Arc<QuotaService>,
    pub exchange_codes: Arc<ExchangeCodeService>,
    pub write_keys: Arc<WriteKeyService>,
    pub transient: Arc<dyn TransientStore>,
    pub isolation: Arc<dyn IsolationProbe>,
}

struct Stores {
    sessions: Arc<dyn SessionStore>,
    quotas: Arc<dyn QuotaStore>,
    write_keys: Arc<dyn WriteKeyStore>,
    audit: Arc<dyn AuditSink>,
    transient: Arc<dyn TransientStore>,
}

/// Handles onto the in-memory backends so callers (tests, local runs) can
/// seed governed rows and inspect audit events.
pub struct InMemoryBackends {
    pub rows: Arc<GovernedRowsTable>,
    pub sessions: Arc<MemorySessionStore>,
    pub quotas: Arc<MemoryQuotaStore>,
    pub write_keys: Arc<MemoryWriteKeyStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub transient: Arc<MemoryTransientStore>,
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(GovernedRowsTable::default()),
            sessions: Arc::new(MemorySessionStore::new()),
            quotas: Arc::new(MemoryQuotaStore::new()),
            write_keys: Arc::new(MemoryWriteKeyStore::new()),
            audit: Arc::new(MemoryAuditSink::new()),
            transient: Arc::new(MemoryTransientStore::new()),
        }
    }

    fn stores(&self) -> Stores {
        Stores {
            sessions: self.sessions.clone(),
            quotas: self.quotas.clone(),
            write_keys: self.write_keys.clone(),
            audit: self.audit.clone(),
            transient: self.transient.clone(),
        }
    }
}

impl Default for InMemoryBackends {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Postgres for sessions, quotas and audit; Redis for exchange codes when
    /// configured, otherwise a process-local store.
    pub fn postgres(
        config: Config,
        pool: DbPool,
        redis: Option<RedisPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let transient: Arc<dyn TransientStore> = match redis {
            Some(pool) => Arc::new(RedisTransientStore::new(pool)),
            None => {
                tracing::warn!("REDIS_URL not set; exchange codes are kept in process memory");
                Arc::new(MemoryTransientStore::new())
            }
        };
        let stores = Stores {
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            quotas: Arc::new(PgQuotaStore::new(pool.clone())),
            write_keys: Arc::new(PgWriteKeyStore::new(pool.clone())),
            audit: Arc::new(PgAuditSink::new(pool.clone())),
            transient,
        };
        let guard = TenantGuard::new(PgScopeBackend::new(pool), config.storage_timeout());
        Self::assemble(config, clock, stores, guard)
    }

    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> (Self, InMemoryBackends) {
        let backends = InMemoryBackends::new();
        let scope = MemoryScopeBackend::new(Arc::clone(&backends.rows));
        let state = Self::from_memory(config, clock, &backends, scope);
        (state, backends)
    }

    /// Like [`AppState::in_memory`] with a caller-built scope backend.
    pub fn from_memory(
        config: Config,
        clock: Arc<dyn Clock>,
        backends: &InMemoryBackends,
        scope: MemoryScopeBackend,
    ) -> Self {
        let guard = TenantGuard::new(scope, config.storage_timeout());
        Self::assemble(config, clock, backends.stores(), guard)
    }

    fn assemble<B: ScopeBackend>(
        config: Config,
        clock: Arc<dyn Clock>,
        stores: Stores,
        guard: TenantGuard<B>,
    ) -> Self {
        let timeout = config.storage_timeout();
        let sessions = SessionService::new(
            stores.sessions,
            Arc::clone(&stores.audit),
            Arc::clone(&clock),
            SessionSettings::from(&config),
        );
        let quotas = QuotaService::new(
            stores.quotas,
            Arc::new(ScopedUsageCounter::new(guard.clone())),
            stores.audit,
            Arc::clone(&clock),
            timeout,
        );
        let exchange_codes = ExchangeCodeService::new(
            Arc::clone(&stores.transient),
            Duration::from_secs(config.exchange_code_ttl_seconds),
        );
        let write_keys = WriteKeyService::new(stores.write_keys, clock, timeout);

        Self {
            config,
            sessions: Arc::new(sessions),
            quotas: Arc::new(quotas),
            exchange_codes: Arc::new(exchange_codes),
            write_keys: Arc::new(write_keys),
            transient: stores.transient,
            isolation: Arc::new(guard),
        }
    }
}

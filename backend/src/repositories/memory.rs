//! In-process stores for tests and `STORAGE_BACKEND=memory`. They follow the
//! same conditional-update rules as the Postgres stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::quota::{QuotaLimits, WorkspaceQuota};
use crate::models::session::{
    EmbeddedSession, NewSession, RefreshLineage, RevocationReason, SessionRotation,
};
use crate::models::write_key::WriteKey;
use crate::repositories::{AuditSink, QuotaStore, SessionStore, WriteKeyStore};
use crate::types::{FamilyId, SessionId, WorkspaceId, WriteKeyId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
struct ConsumedEntry {
    session_id: SessionId,
    consumed_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<SessionId, EmbeddedSession>,
    consumed: HashMap<String, ConsumedEntry>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    tables: Mutex<SessionTables>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: NewSession) -> Result<EmbeddedSession, AppError> {
        let mut tables = lock(&self.tables);
        let duplicate = tables.sessions.values().any(|s| {
            s.id == session.id || s.refresh_token_hash == session.refresh_token_hash
        });
        if duplicate {
            return Err(AppError::Storage(anyhow::anyhow!(
                "duplicate session id or refresh credential"
            )));
        }
        let row = session.into_session();
        tables.sessions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<EmbeddedSession>, AppError> {
        Ok(lock(&self.tables).sessions.get(&id).cloned())
    }

    async fn find_by_refresh_hash(
        &self,
        hash: &str,
    ) -> Result<Option<EmbeddedSession>, AppError> {
        let tables = lock(&self.tables);
        Ok(tables
            .sessions
            .values()
            .find(|s| s.refresh_token_hash == hash)
            .cloned())
    }

    async fn rotate(
        &self,
        rotation: SessionRotation,
    ) -> Result<Option<EmbeddedSession>, AppError> {
        let mut tables = lock(&self.tables);
        let Some(session) = tables.sessions.get_mut(&rotation.session_id) else {
            return Ok(None);
        };
        let applies = session.refresh_token_hash == rotation.presented_refresh_hash
            && session.is_refreshable(rotation.refreshed_at);
        if !applies {
            return Ok(None);
        }

        session.refresh_token_hash = rotation.new_refresh_hash;
        session.previous_access_token_hash = Some(std::mem::replace(
            &mut session.access_token_hash,
            rotation.new_access_hash,
        ));
        session.last_refreshed_at = Some(rotation.refreshed_at);
        session.access_expires_at = rotation.access_expires_at;
        session.refresh_expires_at = rotation.refresh_expires_at;
        session.refresh_count += 1;
        if rotation.client.ip.is_some() {
            session.client_ip = rotation.client.ip;
        }
        if rotation.client.user_agent.is_some() {
            session.user_agent = rotation.client.user_agent;
        }
        if rotation.client.fingerprint.is_some() {
            session.fingerprint = rotation.client.fingerprint;
        }
        let updated = session.clone();

        tables.consumed.insert(
            rotation.presented_refresh_hash,
            ConsumedEntry {
                session_id: updated.id,
                consumed_at: rotation.refreshed_at,
            },
        );
        Ok(Some(updated))
    }

    async fn find_lineage(&self, hash: &str) -> Result<Option<RefreshLineage>, AppError> {
        let tables = lock(&self.tables);
        let lineage = tables.consumed.get(hash).and_then(|entry| {
            tables
                .sessions
                .get(&entry.session_id)
                .map(|session| RefreshLineage {
                    session_id: session.id,
                    family_id: session.family_id,
                    workspace_id: session.workspace_id,
                })
        });
        Ok(lineage)
    }

    async fn revoke(
        &self,
        id: SessionId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<EmbeddedSession>, AppError> {
        let mut tables = lock(&self.tables);
        let revoked = tables
            .sessions
            .get_mut(&id)
            .filter(|session| !session.is_revoked())
            .map(|session| {
                session.revoked_at = Some(at);
                session.revoked_reason = Some(reason);
                session.clone()
            });
        Ok(revoked)
    }

    async fn revoke_family(
        &self,
        family_id: FamilyId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<EmbeddedSession>, AppError> {
        let mut tables = lock(&self.tables);
        let revoked = tables
            .sessions
            .values_mut()
            .filter(|session| session.family_id == family_id && !session.is_revoked())
            .map(|session| {
                session.revoked_at = Some(at);
                session.revoked_reason = Some(reason);
                session.clone()
            })
            .collect();
        Ok(revoked)
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<Vec<EmbeddedSession>, AppError> {
        let mut tables = lock(&self.tables);
        let expired = tables
            .sessions
            .values_mut()
            .filter(|session| {
                !session.is_revoked()
                    && (session.refresh_expires_at <= now || session.absolute_expires_at <= now)
            })
            .map(|session| {
                session.revoked_at = Some(now);
                session.revoked_reason = Some(RevocationReason::Expired);
                session.clone()
            })
            .collect();
        Ok(expired)
    }

    async fn purge_consumed(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = lock(&self.tables);
        let before_len = tables.consumed.len();
        tables.consumed.retain(|_, entry| entry.consumed_at >= before);
        Ok((before_len - tables.consumed.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryQuotaStore {
    rows: Mutex<HashMap<WorkspaceId, WorkspaceQuota>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn find(&self, workspace_id: WorkspaceId) -> Result<Option<WorkspaceQuota>, AppError> {
        Ok(lock(&self.rows).get(&workspace_id).cloned())
    }

    async fn upsert(
        &self,
        workspace_id: WorkspaceId,
        limits: QuotaLimits,
        now: DateTime<Utc>,
    ) -> Result<WorkspaceQuota, AppError> {
        let mut rows = lock(&self.rows);
        let created_at = rows
            .get(&workspace_id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let row = WorkspaceQuota {
            workspace_id,
            max_users: limits.max_users,
            max_segments: limits.max_segments,
            max_journeys: limits.max_journeys,
            max_templates: limits.max_templates,
            max_storage_bytes: limits.max_storage_bytes,
            max_messages_per_month: limits.max_messages_per_month,
            created_at,
            updated_at: now,
        };
        rows.insert(workspace_id, row.clone());
        Ok(row)
    }

    async fn delete(&self, workspace_id: WorkspaceId) -> Result<bool, AppError> {
        Ok(lock(&self.rows).remove(&workspace_id).is_some())
    }
}

#[derive(Default)]
pub struct MemoryWriteKeyStore {
    keys: Mutex<HashMap<WriteKeyId, WriteKey>>,
}

impl MemoryWriteKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriteKeyStore for MemoryWriteKeyStore {
    async fn insert(&self, key: WriteKey) -> Result<WriteKey, AppError> {
        lock(&self.keys).insert(key.id, key.clone());
        Ok(key)
    }

    async fn find_active(&self, id: WriteKeyId) -> Result<Option<WriteKey>, AppError> {
        Ok(lock(&self.keys)
            .get(&id)
            .filter(|key| key.is_active())
            .cloned())
    }
}

/// Keeps every appended event; tests read them back through [`events`](Self::events).
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<(), AppError> {
        lock(&self.events).push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::ClientMetadata;
    use chrono::Duration;

    fn new_session(now: DateTime<Utc>, refresh: &str) -> NewSession {
        NewSession {
            id: SessionId::new(),
            workspace_id: WorkspaceId::new(),
            family_id: FamilyId::new(),
            refresh_token_hash: refresh.into(),
            access_token_hash: format!("access-{refresh}"),
            created_at: now,
            access_expires_at: now + Duration::minutes(15),
            refresh_expires_at: now + Duration::days(7),
            absolute_expires_at: now + Duration::days(30),
            client: ClientMetadata::default(),
        }
    }

    fn rotation(session: &EmbeddedSession, presented: &str, next: &str) -> SessionRotation {
        let now = session.created_at + Duration::minutes(1);
        SessionRotation {
            session_id: session.id,
            presented_refresh_hash: presented.into(),
            new_refresh_hash: next.into(),
            new_access_hash: format!("access-{next}"),
            refreshed_at: now,
            access_expires_at: now + Duration::minutes(15),
            refresh_expires_at: now + Duration::days(7),
            client: ClientMetadata::default(),
        }
    }

    #[tokio::test]
    async fn rotation_is_single_use() {
        let store = MemorySessionStore::new();
        let session = store
            .insert(new_session(Utc::now(), "r0"))
            .await
            .expect("insert");

        let rotated = store
            .rotate(rotation(&session, "r0", "r1"))
            .await
            .expect("rotate")
            .expect("applied");
        assert_eq!(rotated.refresh_count, 1);
        assert_eq!(rotated.previous_access_token_hash.as_deref(), Some("access-r0"));

        let again = store
            .rotate(rotation(&session, "r0", "r2"))
            .await
            .expect("rotate");
        assert!(again.is_none());

        let lineage = store.find_lineage("r0").await.expect("lineage").expect("known");
        assert_eq!(lineage.family_id, session.family_id);
    }

    #[tokio::test]
    async fn revoke_is_reported_once() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = store.insert(new_session(now, "r0")).await.expect("insert");

        let first = store
            .revoke(session.id, RevocationReason::Manual, now)
            .await
            .expect("revoke");
        assert!(first.is_some());
        let second = store
            .revoke(session.id, RevocationReason::Manual, now)
            .await
            .expect("revoke");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn purge_drops_only_old_ledger_entries() {
        let store = MemorySessionStore::new();
        let session = store
            .insert(new_session(Utc::now(), "r0"))
            .await
            .expect("insert");
        store
            .rotate(rotation(&session, "r0", "r1"))
            .await
            .expect("rotate");

        let purged = store
            .purge_consumed(session.created_at)
            .await
            .expect("purge");
        assert_eq!(purged, 0);
        let purged = store
            .purge_consumed(session.created_at + Duration::days(31))
            .await
            .expect("purge");
        assert_eq!(purged, 1);
    }
}

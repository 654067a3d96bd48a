//! Embedded-session storage.
//!
//! Refresh consumption is a conditional update: a rotation only lands while
//! the stored refresh hash still equals the presented one, and the consumed
//! hash is written to the ledger in the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::session::{
    EmbeddedSession, NewSession, RefreshLineage, RevocationReason, SessionRotation,
};
use crate::types::{FamilyId, SessionId};

const SESSION_COLUMNS: &str = "id, workspace_id, family_id, refresh_token_hash, access_token_hash, \
     previous_access_token_hash, created_at, last_refreshed_at, access_expires_at, \
     refresh_expires_at, absolute_expires_at, revoked_at, revoked_reason, refresh_count, \
     client_ip, user_agent, fingerprint";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: NewSession) -> Result<EmbeddedSession, AppError>;

    async fn find_by_id(&self, id: SessionId) -> Result<Option<EmbeddedSession>, AppError>;

    /// Session whose *current* refresh hash is `hash`, in any state.
    async fn find_by_refresh_hash(&self, hash: &str)
        -> Result<Option<EmbeddedSession>, AppError>;

    /// Applies `rotation` if the session is live and its refresh hash still
    /// matches. `None` means another caller consumed the credential first.
    async fn rotate(&self, rotation: SessionRotation)
        -> Result<Option<EmbeddedSession>, AppError>;

    /// Where a refresh hash that has already been rotated away came from.
    async fn find_lineage(&self, hash: &str) -> Result<Option<RefreshLineage>, AppError>;

    /// Revokes one session. `None` when it does not exist or was already revoked.
    async fn revoke(
        &self,
        id: SessionId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<EmbeddedSession>, AppError>;

    /// Revokes every live session of the family and returns them.
    async fn revoke_family(
        &self,
        family_id: FamilyId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<EmbeddedSession>, AppError>;

    /// Moves sessions past either refresh expiry to `revoked (expired)`.
    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<Vec<EmbeddedSession>, AppError>;

    /// Drops ledger entries consumed before `before`.
    async fn purge_consumed(&self, before: DateTime<Utc>) -> Result<u64, AppError>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: NewSession) -> Result<EmbeddedSession, AppError> {
        let query = format!(
            "INSERT INTO embedded_sessions \
                (id, workspace_id, family_id, refresh_token_hash, access_token_hash, created_at, \
                 access_expires_at, refresh_expires_at, absolute_expires_at, refresh_count, \
                 client_ip, user_agent, fingerprint) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11, $12) \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(session.id)
            .bind(session.workspace_id)
            .bind(session.family_id)
            .bind(&session.refresh_token_hash)
            .bind(&session.access_token_hash)
            .bind(session.created_at)
            .bind(session.access_expires_at)
            .bind(session.refresh_expires_at)
            .bind(session.absolute_expires_at)
            .bind(&session.client.ip)
            .bind(&session.client.user_agent)
            .bind(&session.client.fingerprint)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<EmbeddedSession>, AppError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM embedded_sessions WHERE id = $1");
        let row = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_refresh_hash(
        &self,
        hash: &str,
    ) -> Result<Option<EmbeddedSession>, AppError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM embedded_sessions WHERE refresh_token_hash = $1"
        );
        let row = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn rotate(
        &self,
        rotation: SessionRotation,
    ) -> Result<Option<EmbeddedSession>, AppError> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "UPDATE embedded_sessions SET \
                refresh_token_hash = $3, \
                previous_access_token_hash = access_token_hash, \
                access_token_hash = $4, \
                last_refreshed_at = $5, \
                access_expires_at = $6, \
                refresh_expires_at = $7, \
                refresh_count = refresh_count + 1, \
                client_ip = COALESCE($8, client_ip), \
                user_agent = COALESCE($9, user_agent), \
                fingerprint = COALESCE($10, fingerprint) \
             WHERE id = $1 \
               AND refresh_token_hash = $2 \
               AND revoked_at IS NULL \
               AND refresh_expires_at > $5 \
               AND absolute_expires_at > $5 \
             RETURNING {SESSION_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(rotation.session_id)
            .bind(&rotation.presented_refresh_hash)
            .bind(&rotation.new_refresh_hash)
            .bind(&rotation.new_access_hash)
            .bind(rotation.refreshed_at)
            .bind(rotation.access_expires_at)
            .bind(rotation.refresh_expires_at)
            .bind(&rotation.client.ip)
            .bind(&rotation.client.user_agent)
            .bind(&rotation.client.fingerprint)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(session) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO consumed_refresh_tokens (token_hash, session_id, family_id, consumed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&rotation.presented_refresh_hash)
        .bind(session.id)
        .bind(session.family_id)
        .bind(rotation.refreshed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(session))
    }

    async fn find_lineage(&self, hash: &str) -> Result<Option<RefreshLineage>, AppError> {
        let row = sqlx::query_as::<_, RefreshLineage>(
            r#"
            SELECT s.id AS session_id, s.family_id, s.workspace_id
            FROM consumed_refresh_tokens c
            JOIN embedded_sessions s ON s.id = c.session_id
            WHERE c.token_hash = $1
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn revoke(
        &self,
        id: SessionId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<EmbeddedSession>, AppError> {
        let query = format!(
            "UPDATE embedded_sessions SET revoked_at = $2, revoked_reason = $3 \
             WHERE id = $1 AND revoked_at IS NULL \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(id)
            .bind(at)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn revoke_family(
        &self,
        family_id: FamilyId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<EmbeddedSession>, AppError> {
        let query = format!(
            "UPDATE embedded_sessions SET revoked_at = $2, revoked_reason = $3 \
             WHERE family_id = $1 AND revoked_at IS NULL \
             RETURNING {SESSION_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(family_id)
            .bind(at)
            .bind(reason)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<Vec<EmbeddedSession>, AppError> {
        let query = format!(
            "UPDATE embedded_sessions SET revoked_at = $1, revoked_reason = $2 \
             WHERE revoked_at IS NULL \
               AND (refresh_expires_at <= $1 OR absolute_expires_at <= $1) \
             RETURNING {SESSION_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, EmbeddedSession>(&query)
            .bind(now)
            .bind(RevocationReason::Expired)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn purge_consumed(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM consumed_refresh_tokens WHERE consumed_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

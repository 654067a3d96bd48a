//! Session issuer and rotator.
//!
//! `Active -> Active'` on refresh, `-> Revoked` (terminal) on manual revoke,
//! reuse detection or the expiry sweep. A refresh credential is good for
//! exactly one rotation; presenting it again after it was rotated away, or
//! after its session was revoked, is treated as theft and revokes the whole
//! family.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::models::audit::{AuditEvent, AuditEventKind};
use crate::models::session::{
    ClientMetadata, EmbeddedSession, NewSession, RefreshLineage, RevocationReason,
    SessionRotation,
};
use crate::repositories::{AuditSink, SessionStore};
use crate::types::{FamilyId, SessionId, WorkspaceId};
use crate::utils::jwt::{create_access_token, decode_access_token, AccessClaims, TokenUse};
use crate::utils::security::{generate_opaque_token, hash_token};
use crate::utils::time::{within, Clock};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_rolling: Duration,
    pub refresh_absolute: Duration,
    pub access_grace: Duration,
    pub storage_timeout: std::time::Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_rolling: Duration::days(config.refresh_token_rolling_days),
            refresh_absolute: Duration::days(config.refresh_token_absolute_days),
            access_grace: Duration::seconds(config.access_token_grace_seconds),
            storage_timeout: config.storage_timeout(),
        }
    }
}

/// Credentials handed to the embedding client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-credential lifetime in seconds.
    pub expires_in: i64,
    pub token_type: String,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: SessionId,
    pub workspace_id: WorkspaceId,
    pub family_id: FamilyId,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerifyOutcome {
    pub fn invalid() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeTarget {
    Session(SessionId),
    RefreshToken(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub purged_credentials: u64,
}

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            settings,
        }
    }

    pub async fn create(
        &self,
        workspace_id: WorkspaceId,
        client: ClientMetadata,
    ) -> Result<IssuedSession, AppError> {
        let now = self.clock.now();
        let session_id = SessionId::new();
        let family_id = FamilyId::new();
        let refresh_token = generate_opaque_token();
        let access_expires_at = now + self.settings.access_ttl;
        let access_token = self.sign_access(session_id, workspace_id, now, access_expires_at)?;
        let absolute_expires_at = now + self.settings.refresh_absolute;

        let new_session = NewSession {
            id: session_id,
            workspace_id,
            family_id,
            refresh_token_hash: hash_token(&refresh_token),
            access_token_hash: hash_token(&access_token),
            created_at: now,
            access_expires_at,
            refresh_expires_at: (now + self.settings.refresh_rolling).min(absolute_expires_at),
            absolute_expires_at,
            client: client.clone(),
        };
        let session = self.storage(self.store.insert(new_session)).await?;

        self.record(AuditEvent::for_session(
            AuditEventKind::Created,
            &session,
            client,
            now,
        ))
        .await;
        tracing::info!(
            session_id = %session.id,
            workspace_id = %session.workspace_id,
            "Embedded session created"
        );

        Ok(IssuedSession {
            session_id,
            workspace_id,
            family_id,
            tokens: self.token_pair(access_token, refresh_token),
        })
    }

    /// Exchanges a refresh credential for a new pair. Every failure surfaces
    /// as `InvalidRefreshCredential` except storage faults.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: ClientMetadata,
    ) -> Result<IssuedSession, AppError> {
        let now = self.clock.now();
        let presented_hash = hash_token(refresh_token);

        let current = self
            .storage(self.store.find_by_refresh_hash(&presented_hash))
            .await?;

        let session = match current {
            Some(session) if session.is_refreshable(now) => session,
            Some(session)
                if session.is_revoked()
                    && session.revoked_reason != Some(RevocationReason::Expired) =>
            {
                return self.reject_reuse(&session.lineage(), client, now).await;
            }
            Some(session) => {
                tracing::debug!(session_id = %session.id, "Refresh credential past its expiry");
                return Err(AppError::InvalidRefreshCredential);
            }
            None => {
                return match self
                    .storage(self.store.find_lineage(&presented_hash))
                    .await?
                {
                    Some(lineage) => self.reject_reuse(&lineage, client, now).await,
                    None => Err(AppError::InvalidRefreshCredential),
                };
            }
        };

        let refresh_token = generate_opaque_token();
        let access_expires_at = now + self.settings.access_ttl;
        let access_token =
            self.sign_access(session.id, session.workspace_id, now, access_expires_at)?;
        let rotation = SessionRotation {
            session_id: session.id,
            presented_refresh_hash: presented_hash,
            new_refresh_hash: hash_token(&refresh_token),
            new_access_hash: hash_token(&access_token),
            refreshed_at: now,
            access_expires_at,
            refresh_expires_at: (now + self.settings.refresh_rolling)
                .min(session.absolute_expires_at),
            client: client.clone(),
        };

        let Some(rotated) = self.storage(self.store.rotate(rotation)).await? else {
            // Someone else consumed the same credential between lookup and update.
            return self.reject_reuse(&session.lineage(), client, now).await;
        };

        self.record(AuditEvent::for_session(
            AuditEventKind::Refreshed,
            &rotated,
            client,
            now,
        ))
        .await;
        tracing::debug!(
            session_id = %rotated.id,
            refresh_count = rotated.refresh_count,
            "Embedded session refreshed"
        );

        Ok(IssuedSession {
            session_id: rotated.id,
            workspace_id: rotated.workspace_id,
            family_id: rotated.family_id,
            tokens: self.token_pair(access_token, refresh_token),
        })
    }

    /// Revokes the family before answering; if that fails the storage error
    /// is returned instead of the credential error.
    async fn reject_reuse(
        &self,
        lineage: &RefreshLineage,
        client: ClientMetadata,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AppError> {
        let revoked = self
            .storage(self.store.revoke_family(
                lineage.family_id,
                RevocationReason::TokenReuse,
                now,
            ))
            .await?;

        tracing::warn!(
            session_id = %lineage.session_id,
            workspace_id = %lineage.workspace_id,
            family_id = %lineage.family_id,
            revoked = revoked.len(),
            client_ip = client.ip.as_deref().unwrap_or("-"),
            "Refresh credential reuse detected, family revoked"
        );

        self.record(AuditEvent::reuse_detected(
            lineage.session_id,
            lineage.workspace_id,
            lineage.family_id,
            revoked.iter().map(|session| session.id).collect(),
            client.clone(),
            now,
        ))
        .await;
        for session in &revoked {
            self.record(AuditEvent::for_session(
                AuditEventKind::Revoked,
                session,
                client.clone(),
                now,
            ))
            .await;
        }

        Err(AppError::InvalidRefreshCredential)
    }

    /// Checks an access credential. Never fails; any problem, storage faults
    /// included, yields `valid: false`.
    pub async fn verify(&self, access_token: &str) -> VerifyOutcome {
        let now = self.clock.now();

        let claims = match decode_access_token(access_token, &self.settings.jwt_secret) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "Access credential rejected");
                return VerifyOutcome::invalid();
            }
        };
        if claims.token_use() != TokenUse::EmbeddedAccess {
            return VerifyOutcome::invalid();
        }
        let Some(expires_at) = claims.expires_at() else {
            return VerifyOutcome::invalid();
        };
        if now >= expires_at {
            return VerifyOutcome::invalid();
        }

        let session = match self.storage(self.store.find_by_id(claims.session_id())).await {
            Ok(Some(session)) => session,
            Ok(None) => return VerifyOutcome::invalid(),
            Err(err) => {
                tracing::warn!(error = %err, "Session lookup failed during verify");
                return VerifyOutcome::invalid();
            }
        };

        let hash = hash_token(access_token);
        if session.workspace_id != claims.workspace_id()
            || !session.accepts_access_hash(&hash, now, self.settings.access_grace)
        {
            return VerifyOutcome::invalid();
        }

        VerifyOutcome {
            valid: true,
            workspace_id: Some(session.workspace_id),
            session_id: Some(session.id),
            expires_at: Some(expires_at),
        }
    }

    /// Idempotent: revoking an already revoked session succeeds without a new
    /// audit event. Unknown targets are `Unauthorized`.
    pub async fn revoke(
        &self,
        target: RevokeTarget,
        reason: RevocationReason,
    ) -> Result<(), AppError> {
        let now = self.clock.now();
        let Some(session) = self.resolve(target).await? else {
            return Err(AppError::Unauthorized("Session not found".to_string()));
        };

        if let Some(revoked) = self
            .storage(self.store.revoke(session.id, reason, now))
            .await?
        {
            self.record(AuditEvent::for_session(
                AuditEventKind::Revoked,
                &revoked,
                ClientMetadata::default(),
                now,
            ))
            .await;
            tracing::info!(
                session_id = %revoked.id,
                reason = reason.as_str(),
                "Embedded session revoked"
            );
        }
        Ok(())
    }

    async fn resolve(&self, target: RevokeTarget) -> Result<Option<EmbeddedSession>, AppError> {
        match target {
            RevokeTarget::Session(id) => self.storage(self.store.find_by_id(id)).await,
            RevokeTarget::RefreshToken(token) => {
                let hash = hash_token(&token);
                if let Some(session) = self.storage(self.store.find_by_refresh_hash(&hash)).await? {
                    return Ok(Some(session));
                }
                match self.storage(self.store.find_lineage(&hash)).await? {
                    Some(lineage) => self.storage(self.store.find_by_id(lineage.session_id)).await,
                    None => Ok(None),
                }
            }
        }
    }

    /// Expires stale sessions and purges ledger entries older than the
    /// absolute refresh ceiling.
    pub async fn sweep_expired(&self) -> Result<SweepReport, AppError> {
        let now = self.clock.now();
        let expired = self.storage(self.store.expire_sessions(now)).await?;
        for session in &expired {
            self.record(AuditEvent::for_session(
                AuditEventKind::Expired,
                session,
                session.client(),
                now,
            ))
            .await;
        }

        let purged = self
            .storage(
                self.store
                    .purge_consumed(now - self.settings.refresh_absolute),
            )
            .await?;

        Ok(SweepReport {
            expired_sessions: expired.len(),
            purged_credentials: purged,
        })
    }

    fn sign_access(
        &self,
        session_id: SessionId,
        workspace_id: WorkspaceId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = AccessClaims::new(session_id, workspace_id, issued_at, expires_at);
        Ok(create_access_token(&claims, &self.settings.jwt_secret)?)
    }

    fn token_pair(&self, access_token: String, refresh_token: String) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            expires_in: self.settings.access_ttl.num_seconds(),
            token_type: "Bearer".to_string(),
        }
    }

    async fn storage<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        within(self.settings.storage_timeout, fut).await
    }

    async fn record(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(err) = self.storage(self.audit.append(event)).await {
            tracing::warn!(
                error = %err,
                event_type = kind.as_str(),
                "Failed to record session audit event"
            );
        }
    }
}

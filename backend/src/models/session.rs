//! Models for embedded (iframe) sessions and their refresh-credential lineage.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{FamilyId, SessionId, WorkspaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
/// Why a session was moved to the terminal revoked state.
pub enum RevocationReason {
    Manual,
    TokenReuse,
    Expired,
    Security,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Manual => "manual",
            RevocationReason::TokenReuse => "token_reuse",
            RevocationReason::Expired => "expired",
            RevocationReason::Security => "security",
        }
    }
}

/// Request-derived details recorded alongside every session mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
/// Database representation of one embedded session.
pub struct EmbeddedSession {
    pub id: SessionId,
    pub workspace_id: WorkspaceId,
    /// Shared by every credential descended from the original issuance.
    pub family_id: FamilyId,
    /// SHA-256 of the current (single-use) refresh credential.
    pub refresh_token_hash: String,
    pub access_token_hash: String,
    /// Hash of the access credential replaced by the latest rotation.
    pub previous_access_token_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub access_expires_at: DateTime<Utc>,
    /// Rolling refresh expiry, pushed forward on rotation but capped by `absolute_expires_at`.
    pub refresh_expires_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevocationReason>,
    pub refresh_count: i32,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub fingerprint: Option<String>,
}

impl EmbeddedSession {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Whether the current refresh credential may still be exchanged.
    pub fn is_refreshable(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && self.refresh_expires_at > now && self.absolute_expires_at > now
    }

    /// Whether `hash` identifies an access credential this session still honours.
    pub fn accepts_access_hash(&self, hash: &str, now: DateTime<Utc>, grace: Duration) -> bool {
        if self.is_revoked() {
            return false;
        }
        if self.access_token_hash == hash {
            return true;
        }
        match (&self.previous_access_token_hash, self.last_refreshed_at) {
            (Some(previous), Some(rotated_at)) => previous == hash && now < rotated_at + grace,
            _ => false,
        }
    }

    pub fn lineage(&self) -> RefreshLineage {
        RefreshLineage {
            session_id: self.id,
            family_id: self.family_id,
            workspace_id: self.workspace_id,
        }
    }

    pub fn client(&self) -> ClientMetadata {
        ClientMetadata {
            ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Values persisted when a session is first issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: SessionId,
    pub workspace_id: WorkspaceId,
    pub family_id: FamilyId,
    pub refresh_token_hash: String,
    pub access_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
    pub client: ClientMetadata,
}

impl NewSession {
    pub fn into_session(self) -> EmbeddedSession {
        EmbeddedSession {
            id: self.id,
            workspace_id: self.workspace_id,
            family_id: self.family_id,
            refresh_token_hash: self.refresh_token_hash,
            access_token_hash: self.access_token_hash,
            previous_access_token_hash: None,
            created_at: self.created_at,
            last_refreshed_at: None,
            access_expires_at: self.access_expires_at,
            refresh_expires_at: self.refresh_expires_at,
            absolute_expires_at: self.absolute_expires_at,
            revoked_at: None,
            revoked_reason: None,
            refresh_count: 0,
            client_ip: self.client.ip,
            user_agent: self.client.user_agent,
            fingerprint: self.client.fingerprint,
        }
    }
}

/// A conditional rotation: applied only while the stored refresh hash still
/// equals `presented_refresh_hash` and the session is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRotation {
    pub session_id: SessionId,
    pub presented_refresh_hash: String,
    pub new_refresh_hash: String,
    pub new_access_hash: String,
    pub refreshed_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub client: ClientMetadata,
}

/// Where a no-longer-valid refresh credential was last seen.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefreshLineage {
    pub session_id: SessionId,
    pub family_id: FamilyId,
    pub workspace_id: WorkspaceId,
}

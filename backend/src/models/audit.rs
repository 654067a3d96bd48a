use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::quota::{QuotaUsage, ResourceType};
use crate::models::session::{ClientMetadata, EmbeddedSession, RevocationReason};
use crate::types::{AuditEventId, FamilyId, SessionId, WorkspaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Created,
    Refreshed,
    Revoked,
    Expired,
    ReuseDetected,
    QuotaExceeded,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::Created => "created",
            AuditEventKind::Refreshed => "refreshed",
            AuditEventKind::Revoked => "revoked",
            AuditEventKind::Expired => "expired",
            AuditEventKind::ReuseDetected => "reuse_detected",
            AuditEventKind::QuotaExceeded => "quota_exceeded",
        }
    }
}

/// Versioned metadata blob stored with an audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum AuditMetadata {
    #[serde(rename = "1")]
    V1(AuditDetailsV1),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetailsV1 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<FamilyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<RevocationReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revoked_sessions: Vec<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub occurred_at: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub session_id: Option<SessionId>,
    pub workspace_id: Option<WorkspaceId>,
    pub client: ClientMetadata,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub metadata: AuditMetadata,
}

impl AuditEvent {
    /// Successful lifecycle event for `session`.
    pub fn for_session(
        kind: AuditEventKind,
        session: &EmbeddedSession,
        client: ClientMetadata,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEventId::new(),
            occurred_at,
            kind,
            session_id: Some(session.id),
            workspace_id: Some(session.workspace_id),
            client,
            success: true,
            failure_reason: None,
            metadata: AuditMetadata::V1(AuditDetailsV1 {
                family_id: Some(session.family_id),
                refresh_count: Some(session.refresh_count),
                revocation_reason: session.revoked_reason,
                ..AuditDetailsV1::default()
            }),
        }
    }

    /// Refresh-credential reuse; always recorded as a failure.
    pub fn reuse_detected(
        session_id: SessionId,
        workspace_id: WorkspaceId,
        family_id: FamilyId,
        revoked_sessions: Vec<SessionId>,
        client: ClientMetadata,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEventId::new(),
            occurred_at,
            kind: AuditEventKind::ReuseDetected,
            session_id: Some(session_id),
            workspace_id: Some(workspace_id),
            client,
            success: false,
            failure_reason: Some(RevocationReason::TokenReuse.as_str().to_string()),
            metadata: AuditMetadata::V1(AuditDetailsV1 {
                family_id: Some(family_id),
                revocation_reason: Some(RevocationReason::TokenReuse),
                revoked_sessions,
                ..AuditDetailsV1::default()
            }),
        }
    }

    pub fn quota_exceeded(
        workspace_id: WorkspaceId,
        usage: &QuotaUsage,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEventId::new(),
            occurred_at,
            kind: AuditEventKind::QuotaExceeded,
            session_id: None,
            workspace_id: Some(workspace_id),
            client: ClientMetadata::default(),
            success: false,
            failure_reason: Some("quota_exceeded".to_string()),
            metadata: AuditMetadata::V1(AuditDetailsV1 {
                resource_type: Some(usage.resource_type),
                current_usage: Some(usage.current_usage),
                limit: Some(usage.limit),
                ..AuditDetailsV1::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_tagged_with_a_version() {
        let metadata = AuditMetadata::V1(AuditDetailsV1 {
            refresh_count: Some(3),
            ..AuditDetailsV1::default()
        });
        let json = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(json["version"], "1");
        assert_eq!(json["refreshCount"], 3);
        assert!(json.get("revokedSessions").is_none());

        let back: AuditMetadata = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, metadata);
    }

    #[test]
    fn unknown_metadata_versions_are_rejected() {
        let err = serde_json::from_value::<AuditMetadata>(serde_json::json!({
            "version": "2",
            "refreshCount": 1
        }));
        assert!(err.is_err());
    }

    #[test]
    fn reuse_events_are_failures() {
        let event = AuditEvent::reuse_detected(
            SessionId::new(),
            WorkspaceId::new(),
            FamilyId::new(),
            vec![],
            ClientMetadata::default(),
            Utc::now(),
        );
        assert!(!event.success);
        assert_eq!(event.kind.as_str(), "reuse_detected");
        assert_eq!(event.failure_reason.as_deref(), Some("token_reuse"));
    }
}

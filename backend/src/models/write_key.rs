//! Workspace write keys presented by host applications when issuing sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::types::{WorkspaceId, WriteKeyId};

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteKey {
    pub id: WriteKeyId,
    pub workspace_id: WorkspaceId,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl WriteKey {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// A write key as presented in an `Authorization: Bearer <keyId>.<secret>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedWriteKey {
    pub key_id: WriteKeyId,
    pub secret: String,
}

impl PresentedWriteKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, secret) = raw.trim().split_once('.')?;
        if secret.is_empty() {
            return None;
        }
        let key_id = WriteKeyId::parse(id).ok()?;
        Some(Self {
            key_id,
            secret: secret.to_string(),
        })
    }

    pub fn encode(key_id: WriteKeyId, secret: &str) -> String {
        format!("{key_id}.{secret}")
    }
}

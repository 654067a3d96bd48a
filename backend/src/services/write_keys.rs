use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::models::write_key::{PresentedWriteKey, WriteKey};
use crate::repositories::WriteKeyStore;
use crate::types::{WorkspaceId, WriteKeyId};
use crate::utils::security::{constant_time_eq, generate_opaque_token, hash_token};
use crate::utils::time::{within, Clock};

/// A freshly minted key. `write_key` is shown once and never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedWriteKey {
    pub key_id: WriteKeyId,
    pub workspace_id: WorkspaceId,
    pub write_key: String,
}

pub struct WriteKeyService {
    store: Arc<dyn WriteKeyStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl WriteKeyService {
    pub fn new(store: Arc<dyn WriteKeyStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    pub async fn create(&self, workspace_id: WorkspaceId) -> Result<IssuedWriteKey, AppError> {
        let secret = generate_opaque_token();
        let key = WriteKey {
            id: WriteKeyId::new(),
            workspace_id,
            secret_hash: hash_token(&secret),
            created_at: self.clock.now(),
            revoked_at: None,
        };
        let stored = within(self.timeout, self.store.insert(key)).await?;
        tracing::info!(
            key_id = %stored.id,
            workspace_id = %workspace_id,
            "Workspace write key created"
        );
        Ok(IssuedWriteKey {
            key_id: stored.id,
            workspace_id,
            write_key: PresentedWriteKey::encode(stored.id, &secret),
        })
    }

    /// Resolves a presented key to the workspace it is bound to.
    pub async fn authenticate(&self, raw: &str) -> Result<WorkspaceId, AppError> {
        let unauthorized = || AppError::Unauthorized("Invalid write key".to_string());
        let presented = PresentedWriteKey::parse(raw).ok_or_else(unauthorized)?;
        let key = within(self.timeout, self.store.find_active(presented.key_id))
            .await?
            .ok_or_else(unauthorized)?;
        if !constant_time_eq(&hash_token(&presented.secret), &key.secret_hash) {
            return Err(unauthorized());
        }
        Ok(key.workspace_id)
    }
}

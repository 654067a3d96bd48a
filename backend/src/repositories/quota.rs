use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::quota::{QuotaLimits, WorkspaceQuota};
use crate::types::WorkspaceId;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn find(&self, workspace_id: WorkspaceId) -> Result<Option<WorkspaceQuota>, AppError>;

    async fn upsert(
        &self,
        workspace_id: WorkspaceId,
        limits: QuotaLimits,
        now: DateTime<Utc>,
    ) -> Result<WorkspaceQuota, AppError>;

    /// Returns whether a row was removed.
    async fn delete(&self, workspace_id: WorkspaceId) -> Result<bool, AppError>;
}

#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn find(&self, workspace_id: WorkspaceId) -> Result<Option<WorkspaceQuota>, AppError> {
        let row = sqlx::query_as::<_, WorkspaceQuota>(
            r#"
            SELECT workspace_id, max_users, max_segments, max_journeys, max_templates,
                   max_storage_bytes, max_messages_per_month, created_at, updated_at
            FROM workspace_quotas
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert(
        &self,
        workspace_id: WorkspaceId,
        limits: QuotaLimits,
        now: DateTime<Utc>,
    ) -> Result<WorkspaceQuota, AppError> {
        let row = sqlx::query_as::<_, WorkspaceQuota>(
            r#"
            INSERT INTO workspace_quotas
                (workspace_id, max_users, max_segments, max_journeys, max_templates,
                 max_storage_bytes, max_messages_per_month, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (workspace_id) DO UPDATE SET
                max_users = EXCLUDED.max_users,
                max_segments = EXCLUDED.max_segments,
                max_journeys = EXCLUDED.max_journeys,
                max_templates = EXCLUDED.max_templates,
                max_storage_bytes = EXCLUDED.max_storage_bytes,
                max_messages_per_month = EXCLUDED.max_messages_per_month,
                updated_at = EXCLUDED.updated_at
            RETURNING workspace_id, max_users, max_segments, max_journeys, max_templates,
                      max_storage_bytes, max_messages_per_month, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(limits.max_users)
        .bind(limits.max_segments)
        .bind(limits.max_journeys)
        .bind(limits.max_templates)
        .bind(limits.max_storage_bytes)
        .bind(limits.max_messages_per_month)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete(&self, workspace_id: WorkspaceId) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM workspace_quotas WHERE workspace_id = $1")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

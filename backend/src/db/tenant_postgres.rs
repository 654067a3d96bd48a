use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::tenant::{ScopeBackend, UnitOfWork};
use crate::error::AppError;
use crate::models::quota::ResourceType;
use crate::types::WorkspaceId;

/// Setting read by the row-level security policies on every governed table.
pub const WORKSPACE_SETTING: &str = "app.current_workspace_id";

#[derive(Clone)]
pub struct PgScopeBackend {
    pool: PgPool,
}

impl PgScopeBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn usage_query(resource: ResourceType) -> &'static str {
    match resource {
        ResourceType::Users => "SELECT COUNT(*) FROM workspace_members WHERE workspace_id = $1",
        ResourceType::Segments => "SELECT COUNT(*) FROM segments WHERE workspace_id = $1",
        ResourceType::Journeys => "SELECT COUNT(*) FROM journeys WHERE workspace_id = $1",
        ResourceType::Templates => {
            "SELECT COUNT(*) FROM message_templates WHERE workspace_id = $1"
        }
        ResourceType::StorageBytes => {
            "SELECT COALESCE(SUM(size_bytes), 0)::BIGINT FROM stored_assets WHERE workspace_id = $1"
        }
        ResourceType::MessagesPerMonth => {
            "SELECT COUNT(*) FROM sent_messages \
             WHERE workspace_id = $1 AND sent_at >= date_trunc('month', NOW())"
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn set_workspace(&mut self, workspace_id: &WorkspaceId) -> Result<(), AppError> {
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(WORKSPACE_SETTING)
            .bind(workspace_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn clear_workspace(&mut self) -> Result<(), AppError> {
        sqlx::query("SELECT set_config($1, '', true)")
            .bind(WORKSPACE_SETTING)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn active_workspace(&mut self) -> Result<Option<WorkspaceId>, AppError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT NULLIF(current_setting($1, true), '')")
                .bind(WORKSPACE_SETTING)
                .fetch_one(&mut *self.tx)
                .await?;
        raw.map(|value| WorkspaceId::parse(&value).map_err(AppError::from))
            .transpose()
    }

    async fn count_rows(
        &mut self,
        workspace_id: &WorkspaceId,
        resource: ResourceType,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(usage_query(resource))
            .bind(workspace_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ScopeBackend for PgScopeBackend {
    type Unit = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, AppError> {
        let tx = self.pool.begin().await?;
        Ok(PgUnitOfWork { tx })
    }

    /// True only when the table has row-level security enabled and forced,
    /// so even the table owner is filtered.
    async fn isolation_enabled(&self, resource: ResourceType) -> Result<bool, AppError> {
        let enabled: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT relrowsecurity AND relforcerowsecurity
            FROM pg_class
            WHERE oid = to_regclass($1)
            "#,
        )
        .bind(resource.table())
        .fetch_optional(&self.pool)
        .await?;
        Ok(enabled.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_usage_query_filters_by_workspace() {
        for resource in ResourceType::ALL {
            let sql = usage_query(resource);
            assert!(sql.contains(resource.table()), "{resource} queries its table");
            assert!(sql.contains("workspace_id = $1"), "{resource} filters");
        }
    }
}

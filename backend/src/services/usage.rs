use async_trait::async_trait;
use futures::FutureExt;

use crate::db::tenant::{ScopeBackend, TenantGuard};
use crate::error::AppError;
use crate::models::quota::{ResourceType, ResourceUsage};
use crate::types::WorkspaceId;

/// Counts governed rows for one workspace. Figures are read fresh on every
/// call and never cached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageCounter: Send + Sync {
    async fn count(&self, workspace_id: WorkspaceId, resource: ResourceType)
        -> Result<i64, AppError>;

    async fn snapshot(&self, workspace_id: WorkspaceId) -> Result<ResourceUsage, AppError>;
}

/// Counts through the tenant guard so every query runs under the
/// workspace's row-level policies.
pub struct ScopedUsageCounter<B> {
    guard: TenantGuard<B>,
}

impl<B: ScopeBackend> ScopedUsageCounter<B> {
    pub fn new(guard: TenantGuard<B>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl<B: ScopeBackend> UsageCounter for ScopedUsageCounter<B> {
    async fn count(
        &self,
        workspace_id: WorkspaceId,
        resource: ResourceType,
    ) -> Result<i64, AppError> {
        self.guard
            .run_in(workspace_id, move |scope| {
                async move { scope.count_rows(resource).await }.boxed()
            })
            .await
    }

    async fn snapshot(&self, workspace_id: WorkspaceId) -> Result<ResourceUsage, AppError> {
        self.guard
            .run_in(workspace_id, move |scope| {
                async move {
                    let mut usage = ResourceUsage::default();
                    for resource in ResourceType::ALL {
                        usage.set(resource, scope.count_rows(resource).await?);
                    }
                    Ok::<_, AppError>(usage)
                }
                .boxed()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tenant_memory::{GovernedRowsTable, MemoryScopeBackend};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn snapshot_reports_every_resource_of_one_workspace() {
        let rows = Arc::new(GovernedRowsTable::default());
        let mine = WorkspaceId::new();
        let other = WorkspaceId::new();
        rows.set(mine, ResourceType::Journeys, 12);
        rows.set(mine, ResourceType::StorageBytes, 2048);
        rows.set(other, ResourceType::Journeys, 99);

        let guard = TenantGuard::new(
            MemoryScopeBackend::new(Arc::clone(&rows)),
            Duration::from_secs(1),
        );
        let counter = ScopedUsageCounter::new(guard);

        let usage = counter.snapshot(mine).await.expect("snapshot");
        assert_eq!(usage.journeys, 12);
        assert_eq!(usage.storage_bytes, 2048);
        assert_eq!(usage.users, 0);

        let journeys = counter
            .count(other, ResourceType::Journeys)
            .await
            .expect("count");
        assert_eq!(journeys, 99);
    }
}

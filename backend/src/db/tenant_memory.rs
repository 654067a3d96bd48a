//! In-process scope backend used for tests and `STORAGE_BACKEND=memory`.
//!
//! Models a single pooled connection: each unit of work holds it exclusively
//! and its transaction-local workspace setting is wiped when the unit ends,
//! whether by commit, rollback or drop.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::tenant::{ScopeBackend, UnitOfWork};
use crate::error::AppError;
use crate::models::quota::ResourceType;
use crate::types::WorkspaceId;

#[derive(Debug, Default)]
struct ConnectionState {
    local_workspace: Option<WorkspaceId>,
}

/// Stand-in for the governed tables: one running total per workspace and
/// resource type.
#[derive(Debug, Default)]
pub struct GovernedRowsTable {
    totals: RwLock<HashMap<(WorkspaceId, ResourceType), i64>>,
}

impl GovernedRowsTable {
    pub fn set(&self, workspace_id: WorkspaceId, resource: ResourceType, value: i64) {
        let mut totals = self.totals.write().unwrap_or_else(|e| e.into_inner());
        totals.insert((workspace_id, resource), value);
    }

    pub fn add(&self, workspace_id: WorkspaceId, resource: ResourceType, delta: i64) {
        let mut totals = self.totals.write().unwrap_or_else(|e| e.into_inner());
        *totals.entry((workspace_id, resource)).or_insert(0) += delta;
    }

    fn get(&self, workspace_id: WorkspaceId, resource: ResourceType) -> i64 {
        let totals = self.totals.read().unwrap_or_else(|e| e.into_inner());
        totals.get(&(workspace_id, resource)).copied().unwrap_or(0)
    }
}

pub struct MemoryScopeBackend {
    connection: Arc<Mutex<ConnectionState>>,
    rows: Arc<GovernedRowsTable>,
    isolated: Arc<HashSet<ResourceType>>,
}

impl MemoryScopeBackend {
    /// Backend with row-level isolation on every governed table.
    pub fn new(rows: Arc<GovernedRowsTable>) -> Self {
        Self {
            connection: Arc::new(Mutex::new(ConnectionState::default())),
            rows,
            isolated: Arc::new(ResourceType::ALL.into_iter().collect()),
        }
    }

    /// Turns isolation off for `resources`, as if their policies were missing.
    pub fn without_isolation(mut self, resources: &[ResourceType]) -> Self {
        let isolated = self
            .isolated
            .iter()
            .copied()
            .filter(|r| !resources.contains(r))
            .collect();
        self.isolated = Arc::new(isolated);
        self
    }
}

pub struct MemoryUnit {
    connection: OwnedMutexGuard<ConnectionState>,
    rows: Arc<GovernedRowsTable>,
    isolated: Arc<HashSet<ResourceType>>,
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        self.connection.local_workspace = None;
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn set_workspace(&mut self, workspace_id: &WorkspaceId) -> Result<(), AppError> {
        self.connection.local_workspace = Some(*workspace_id);
        Ok(())
    }

    async fn clear_workspace(&mut self) -> Result<(), AppError> {
        self.connection.local_workspace = None;
        Ok(())
    }

    async fn active_workspace(&mut self) -> Result<Option<WorkspaceId>, AppError> {
        Ok(self.connection.local_workspace)
    }

    async fn count_rows(
        &mut self,
        workspace_id: &WorkspaceId,
        resource: ResourceType,
    ) -> Result<i64, AppError> {
        let visible = !self.isolated.contains(&resource)
            || self.connection.local_workspace == Some(*workspace_id);
        if !visible {
            return Ok(0);
        }
        Ok(self.rows.get(*workspace_id, resource))
    }

    async fn commit(self) -> Result<(), AppError> {
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl ScopeBackend for MemoryScopeBackend {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, AppError> {
        let connection = Arc::clone(&self.connection).lock_owned().await;
        Ok(MemoryUnit {
            connection,
            rows: Arc::clone(&self.rows),
            isolated: Arc::clone(&self.isolated),
        })
    }

    async fn isolation_enabled(&self, resource: ResourceType) -> Result<bool, AppError> {
        Ok(self.isolated.contains(&resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscoped_unit_sees_nothing() {
        let rows = Arc::new(GovernedRowsTable::default());
        let workspace_id = WorkspaceId::new();
        rows.add(workspace_id, ResourceType::Templates, 4);
        let backend = MemoryScopeBackend::new(Arc::clone(&rows));

        let mut unit = backend.begin().await.expect("begin");
        let hidden = unit
            .count_rows(&workspace_id, ResourceType::Templates)
            .await
            .expect("count");
        assert_eq!(hidden, 0);

        unit.set_workspace(&workspace_id).await.expect("set");
        let visible = unit
            .count_rows(&workspace_id, ResourceType::Templates)
            .await
            .expect("count");
        assert_eq!(visible, 4);
    }

    #[tokio::test]
    async fn dropped_unit_releases_its_workspace() {
        let backend = MemoryScopeBackend::new(Arc::new(GovernedRowsTable::default()));
        {
            let mut unit = backend.begin().await.expect("begin");
            unit.set_workspace(&WorkspaceId::new()).await.expect("set");
        }
        let mut next = backend.begin().await.expect("begin");
        assert_eq!(next.active_workspace().await.expect("active"), None);
    }

    #[tokio::test]
    async fn disabled_isolation_is_reported() {
        let backend = MemoryScopeBackend::new(Arc::new(GovernedRowsTable::default()))
            .without_isolation(&[ResourceType::StorageBytes]);
        assert!(!backend
            .isolation_enabled(ResourceType::StorageBytes)
            .await
            .expect("probe"));
        assert!(backend
            .isolation_enabled(ResourceType::Users)
            .await
            .expect("probe"));
    }
}

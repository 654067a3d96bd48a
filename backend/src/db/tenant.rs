//! Tenant context guard.
//!
//! Every read or write against a governed table happens inside a unit of work
//! (one database transaction) that carries exactly one active workspace, or
//! none at all. With no workspace set the row-level policies match zero rows,
//! so forgetting to scope a query fails closed instead of leaking another
//! tenant's data.
//!
//! [`TenantGuard::run_in`] is the production entry point: it opens the unit,
//! marks it with the workspace, hands the caller a [`TenantScope`] and ends the
//! unit on every exit path. Commit and rollback both discard the marker since
//! it is transaction-local; dropping the unit (a cancelled request) rolls back.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::error::AppError;
use crate::models::quota::ResourceType;
use crate::types::WorkspaceId;
use crate::utils::time::within;

/// One unit of database work. The workspace marker it carries is local to
/// the unit and never outlives it.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn set_workspace(&mut self, workspace_id: &WorkspaceId) -> Result<(), AppError>;

    async fn clear_workspace(&mut self) -> Result<(), AppError>;

    async fn active_workspace(&mut self) -> Result<Option<WorkspaceId>, AppError>;

    /// Current size of `resource` for `workspace_id`, as visible under the
    /// unit's active workspace.
    async fn count_rows(
        &mut self,
        workspace_id: &WorkspaceId,
        resource: ResourceType,
    ) -> Result<i64, AppError>;

    async fn commit(self) -> Result<(), AppError>;

    async fn rollback(self) -> Result<(), AppError>;
}

/// Opens units of work and reports whether storage-level isolation is in force.
#[async_trait]
pub trait ScopeBackend: Send + Sync + 'static {
    type Unit: UnitOfWork + 'static;

    async fn begin(&self) -> Result<Self::Unit, AppError>;

    async fn isolation_enabled(&self, resource: ResourceType) -> Result<bool, AppError>;
}

/// Handle for a unit of work bound to one workspace. Governed storage calls
/// take this instead of a bare connection.
pub struct TenantScope<U> {
    unit: U,
    workspace_id: WorkspaceId,
    timeout: Duration,
}

impl<U: UnitOfWork> TenantScope<U> {
    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn unit(&mut self) -> &mut U {
        &mut self.unit
    }

    pub async fn count_rows(&mut self, resource: ResourceType) -> Result<i64, AppError> {
        let workspace_id = self.workspace_id;
        within(self.timeout, self.unit.count_rows(&workspace_id, resource)).await
    }
}

pub struct TenantGuard<B> {
    backend: Arc<B>,
    timeout: Duration,
}

impl<B> Clone for TenantGuard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
        }
    }
}

impl<B: ScopeBackend> TenantGuard<B> {
    pub fn new(backend: B, timeout: Duration) -> Self {
        Self {
            backend: Arc::new(backend),
            timeout,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Opens an unscoped unit. Governed tables match nothing until
    /// [`set_context`](Self::set_context) is called on it.
    pub async fn begin(&self) -> Result<B::Unit, AppError> {
        within(self.timeout, self.backend.begin()).await
    }

    /// Validates `raw` and marks `unit` with it.
    pub async fn set_context(&self, unit: &mut B::Unit, raw: &str) -> Result<WorkspaceId, AppError> {
        let workspace_id = WorkspaceId::parse(raw)?;
        within(self.timeout, unit.set_workspace(&workspace_id)).await?;
        Ok(workspace_id)
    }

    pub async fn clear_context(&self, unit: &mut B::Unit) -> Result<(), AppError> {
        within(self.timeout, unit.clear_workspace()).await
    }

    /// Introspection only; never use the result to authorize anything.
    pub async fn get_active_context(
        &self,
        unit: &mut B::Unit,
    ) -> Result<Option<WorkspaceId>, AppError> {
        within(self.timeout, unit.active_workspace()).await
    }

    /// Parses `raw` and runs `f` scoped to it. Malformed identifiers are
    /// rejected before any unit is opened.
    pub async fn run_scoped<T, F>(&self, raw: &str, f: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut TenantScope<B::Unit>) -> BoxFuture<'s, Result<T, AppError>>
            + Send,
    {
        let workspace_id = WorkspaceId::parse(raw)?;
        self.run_in(workspace_id, f).await
    }

    /// Runs `f` inside a fresh unit scoped to `workspace_id`. Commits when `f`
    /// succeeds and rolls back otherwise.
    pub async fn run_in<T, F>(&self, workspace_id: WorkspaceId, f: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut TenantScope<B::Unit>) -> BoxFuture<'s, Result<T, AppError>>
            + Send,
    {
        let span = tracing::debug_span!("tenant_scope", workspace_id = %workspace_id);
        async move {
            let mut unit = self.begin().await?;
            within(self.timeout, unit.set_workspace(&workspace_id)).await?;

            let mut scope = TenantScope {
                unit,
                workspace_id,
                timeout: self.timeout,
            };
            let outcome = f(&mut scope).await;
            let TenantScope { unit, .. } = scope;

            match outcome {
                Ok(value) => {
                    within(self.timeout, unit.commit()).await?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = within(self.timeout, unit.rollback()).await {
                        tracing::warn!(error = %rollback_err, "Failed to roll back tenant scope");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Whether row-level isolation is enforced for `resource`'s table. Any
    /// failure to determine this reports `false`.
    pub async fn is_isolation_enabled(&self, resource: ResourceType) -> bool {
        match within(self.timeout, self.backend.isolation_enabled(resource)).await {
            Ok(enabled) => enabled,
            Err(err) => {
                tracing::warn!(
                    resource = %resource,
                    error = %err,
                    "Isolation check failed, reporting disabled"
                );
                false
            }
        }
    }
}

/// Object-safe view of the guard used at startup and by the health endpoint.
#[async_trait]
pub trait IsolationProbe: Send + Sync {
    async fn isolation_status(&self) -> BTreeMap<ResourceType, bool>;

    /// Governed resources whose tables are not isolated per workspace.
    async fn unisolated_resources(&self) -> Vec<ResourceType> {
        self.isolation_status()
            .await
            .into_iter()
            .filter_map(|(resource, enabled)| (!enabled).then_some(resource))
            .collect()
    }
}

#[async_trait]
impl<B: ScopeBackend> IsolationProbe for TenantGuard<B> {
    async fn isolation_status(&self) -> BTreeMap<ResourceType, bool> {
        let mut status = BTreeMap::new();
        for resource in ResourceType::ALL {
            status.insert(resource, self.is_isolation_enabled(resource).await);
        }
        status
    }
}

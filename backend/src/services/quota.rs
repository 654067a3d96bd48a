//! Quota ledger.
//!
//! Validation is read-then-decide: two creators racing for the last slot can
//! both be admitted. Callers needing a hard ceiling must enforce it again in
//! the write that creates the resource.

use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::quota::{
    QuotaDecision, QuotaLimits, QuotaOverrides, QuotaOverview, ResourceType, ResourceUsage,
};
use crate::repositories::{AuditSink, QuotaStore};
use crate::services::usage::UsageCounter;
use crate::types::WorkspaceId;
use crate::utils::time::{within, Clock};

pub struct QuotaService {
    store: Arc<dyn QuotaStore>,
    usage: Arc<dyn UsageCounter>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl QuotaService {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        usage: Arc<dyn UsageCounter>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            usage,
            audit,
            clock,
            timeout,
        }
    }

    /// Configured ceilings, or the defaults when the workspace has no row.
    pub async fn get_quota(&self, workspace_id: WorkspaceId) -> Result<QuotaLimits, AppError> {
        let row = within(self.timeout, self.store.find(workspace_id)).await?;
        Ok(row.map(|quota| quota.limits()).unwrap_or_default())
    }

    /// Merges `overrides` over the current ceilings and stores the result.
    pub async fn upsert_quota(
        &self,
        workspace_id: WorkspaceId,
        overrides: &QuotaOverrides,
    ) -> Result<QuotaLimits, AppError> {
        overrides.validate()?;
        let current = self.get_quota(workspace_id).await?;
        let merged = overrides.apply_to(current);
        let row = within(
            self.timeout,
            self.store.upsert(workspace_id, merged, self.clock.now()),
        )
        .await?;
        tracing::info!(workspace_id = %workspace_id, "Workspace quota updated");
        Ok(row.limits())
    }

    pub async fn delete_quota(&self, workspace_id: WorkspaceId) -> Result<bool, AppError> {
        within(self.timeout, self.store.delete(workspace_id)).await
    }

    pub async fn usage(&self, workspace_id: WorkspaceId) -> Result<ResourceUsage, AppError> {
        self.usage.snapshot(workspace_id).await
    }

    pub async fn overview(&self, workspace_id: WorkspaceId) -> Result<QuotaOverview, AppError> {
        let quota = self.get_quota(workspace_id).await?;
        let usage = self.usage(workspace_id).await?;
        Ok(QuotaOverview::new(workspace_id, quota, usage))
    }

    /// Would adding `increment` of `resource` stay within the ceiling?
    /// Rejections are returned as `QuotaDecision::Exceeded`, not as errors.
    pub async fn validate(
        &self,
        workspace_id: WorkspaceId,
        resource: ResourceType,
        increment: i64,
    ) -> Result<QuotaDecision, AppError> {
        if increment <= 0 {
            return Err(AppError::Validation(vec![
                "increment: must be a positive integer".to_string(),
            ]));
        }

        let limits = self.get_quota(workspace_id).await?;
        let current = self.usage.count(workspace_id, resource).await?;
        let decision =
            QuotaDecision::evaluate(resource, current, limits.limit_for(resource), increment);

        if let QuotaDecision::Exceeded(usage) = &decision {
            tracing::warn!(
                workspace_id = %workspace_id,
                resource = %resource,
                current_usage = usage.current_usage,
                limit = usage.limit,
                increment,
                "Quota exceeded"
            );
            let event = AuditEvent::quota_exceeded(workspace_id, usage, self.clock.now());
            if let Err(err) = within(self.timeout, self.audit.append(event)).await {
                tracing::warn!(error = %err, "Failed to record quota audit event");
            }
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::audit_event::MockAuditSink;
    use crate::repositories::quota::MockQuotaStore;
    use crate::services::usage::MockUsageCounter;
    use crate::utils::time::SystemClock;

    fn service(
        store: MockQuotaStore,
        usage: MockUsageCounter,
        audit: MockAuditSink,
    ) -> QuotaService {
        QuotaService::new(
            Arc::new(store),
            Arc::new(usage),
            Arc::new(audit),
            Arc::new(SystemClock),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn default_journeys_quota_admits_below_and_rejects_at_ceiling() {
        let mut store = MockQuotaStore::new();
        store.expect_find().returning(|_| Ok(None));
        let mut usage = MockUsageCounter::new();
        let mut calls = 0;
        usage.expect_count().returning(move |_, _| {
            calls += 1;
            Ok(if calls == 1 { 19 } else { 20 })
        });
        let mut audit = MockAuditSink::new();
        audit.expect_append().times(1).returning(|_| Ok(()));
        let service = service(store, usage, audit);
        let workspace_id = WorkspaceId::new();

        let first = service
            .validate(workspace_id, ResourceType::Journeys, 1)
            .await
            .expect("validate");
        assert!(first.is_allowed());
        assert_eq!(first.usage().remaining, 0);

        let second = service
            .validate(workspace_id, ResourceType::Journeys, 1)
            .await
            .expect("validate");
        assert!(!second.is_allowed());
        assert_eq!(second.usage().current_usage, 20);
        assert_eq!(second.usage().percent_used, 100);
    }

    #[tokio::test]
    async fn non_positive_increment_is_a_validation_error() {
        let service = service(
            MockQuotaStore::new(),
            MockUsageCounter::new(),
            MockAuditSink::new(),
        );
        let err = service
            .validate(WorkspaceId::new(), ResourceType::Segments, 0)
            .await
            .expect_err("zero increment");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_storage_error() {
        let mut store = MockQuotaStore::new();
        store
            .expect_find()
            .returning(|_| Err(AppError::Storage(anyhow::anyhow!("down"))));
        let service = service(store, MockUsageCounter::new(), MockAuditSink::new());
        let err = service
            .get_quota(WorkspaceId::new())
            .await
            .expect_err("storage down");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn upsert_rejects_negative_limits_before_writing() {
        let service = service(
            MockQuotaStore::new(),
            MockUsageCounter::new(),
            MockAuditSink::new(),
        );
        let overrides = QuotaOverrides::default().set(ResourceType::Users, -5);
        let err = service
            .upsert_quota(WorkspaceId::new(), &overrides)
            .await
            .expect_err("negative");
        assert!(matches!(err, AppError::Validation(_)));
    }
}

//! Append-only audit sink.

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};

use crate::error::AppError;
use crate::models::audit::AuditEvent;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events
                (id, occurred_at, event_type, session_id, workspace_id, client_ip, user_agent,
                 fingerprint, success, failure_reason, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.occurred_at)
        .bind(event.kind)
        .bind(event.session_id)
        .bind(event.workspace_id)
        .bind(event.client.ip)
        .bind(event.client.user_agent)
        .bind(event.client.fingerprint)
        .bind(event.success)
        .bind(event.failure_reason)
        .bind(Json(event.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

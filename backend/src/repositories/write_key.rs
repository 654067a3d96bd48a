use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::write_key::WriteKey;
use crate::types::WriteKeyId;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WriteKeyStore: Send + Sync {
    async fn insert(&self, key: WriteKey) -> Result<WriteKey, AppError>;

    /// Looks up a key that has not been revoked.
    async fn find_active(&self, id: WriteKeyId) -> Result<Option<WriteKey>, AppError>;
}

#[derive(Clone)]
pub struct PgWriteKeyStore {
    pool: PgPool,
}

impl PgWriteKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WriteKeyStore for PgWriteKeyStore {
    async fn insert(&self, key: WriteKey) -> Result<WriteKey, AppError> {
        let row = sqlx::query_as::<_, WriteKey>(
            r#"
            INSERT INTO workspace_write_keys (id, workspace_id, secret_hash, created_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, workspace_id, secret_hash, created_at, revoked_at
            "#,
        )
        .bind(key.id)
        .bind(key.workspace_id)
        .bind(&key.secret_hash)
        .bind(key.created_at)
        .bind(key.revoked_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_active(&self, id: WriteKeyId) -> Result<Option<WriteKey>, AppError> {
        let row = sqlx::query_as::<_, WriteKey>(
            r#"
            SELECT id, workspace_id, secret_hash, created_at, revoked_at
            FROM workspace_write_keys
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub type DbPool = PgPool;

/// Opens the Postgres pool. `acquire_timeout` matches the storage deadline so a
/// starved pool surfaces as `PoolTimedOut` rather than hanging a request.
pub async fn create_pool(database_url: &str, acquire_timeout: Duration) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

//! One-shot maintenance pass for cron-style deployments.

use std::sync::Arc;

use tenantgate_backend::{
    config::Config,
    db::{connection::create_pool, redis::create_redis_pool},
    services::maintenance::run_maintenance,
    state::AppState,
    utils::time::SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantgate_backend=info".into()),
        )
        .init();

    let config = Config::load()?;
    let pool = create_pool(&config.database_url, config.storage_timeout()).await?;
    let redis = create_redis_pool(&config).await?;
    let state = AppState::postgres(config, pool.clone(), redis, Arc::new(SystemClock));

    let report = run_maintenance(&state.sessions, state.transient.as_ref())
        .await
        .map_err(|err| anyhow::anyhow!("maintenance failed: {err}"))?;
    tracing::info!(
        expired_sessions = report.expired_sessions,
        purged_credentials = report.purged_credentials,
        purged_transient = report.purged_transient,
        "Session sweep finished"
    );

    sqlx::query("VACUUM (ANALYZE) consumed_refresh_tokens")
        .execute(&pool)
        .await?;

    Ok(())
}

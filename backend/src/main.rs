use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenantgate_backend::{
    config::{Config, StorageBackend},
    db::{connection::create_pool, redis::create_redis_pool},
    routes::router,
    services::maintenance::spawn_maintenance,
    state::AppState,
    utils::time::SystemClock,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantgate_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let admin_api_key = config
        .admin_api_key
        .as_deref()
        .map(mask_secret)
        .unwrap_or_else(|| "<unset>".into());
    tracing::info!(
        storage_backend = ?config.storage_backend,
        redis = config.redis_url.is_some(),
        jwt_secret = %mask_secret(&config.jwt_secret),
        admin_api_key = %admin_api_key,
        access_token_ttl_minutes = config.access_token_ttl_minutes,
        refresh_token_rolling_days = config.refresh_token_rolling_days,
        refresh_token_absolute_days = config.refresh_token_absolute_days,
        storage_timeout_ms = config.storage_timeout_ms,
        "Loaded configuration from environment/.env"
    );

    let clock = Arc::new(SystemClock);
    let state = match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url, config.storage_timeout()).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            let redis = create_redis_pool(&config).await?;
            AppState::postgres(config.clone(), pool, redis, clock)
        }
        StorageBackend::Memory => {
            tracing::warn!("STORAGE_BACKEND=memory; state is lost on restart");
            let (state, _backends) = AppState::in_memory(config.clone(), clock);
            state
        }
    };

    for resource in state.isolation.unisolated_resources().await {
        tracing::warn!(
            resource = %resource,
            table = resource.table(),
            "Row-level isolation is not enforced; workspace usage may leak across tenants"
        );
    }

    let sweeper = spawn_maintenance(
        Arc::clone(&state.sessions),
        Arc::clone(&state.transient),
        Duration::from_secs(config.session_sweep_interval_seconds.max(1)),
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

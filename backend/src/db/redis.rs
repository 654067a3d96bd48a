use crate::config::Config;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;

pub type RedisPool = Pool<RedisConnectionManager>;

/// Builds the pool backing one-time exchange codes. `None` when `REDIS_URL`
/// is unset; callers then fall back to the in-process transient store.
pub async fn create_redis_pool(config: &Config) -> anyhow::Result<Option<RedisPool>> {
    let Some(url) = &config.redis_url else {
        tracing::info!("Redis URL not set, transient state kept in process");
        return Ok(None);
    };

    let manager = RedisConnectionManager::new(url.clone())?;
    let pool = Pool::builder()
        .max_size(config.redis_pool_size)
        .connection_timeout(Duration::from_secs(config.redis_connect_timeout))
        .build(manager)
        .await?;

    tracing::info!(
        pool_size = config.redis_pool_size,
        "Redis transient store pool created"
    );
    Ok(Some(pool))
}

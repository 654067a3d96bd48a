//! Short-lived key/value state with single-use reads.

use async_trait::async_trait;
use bb8_redis::redis;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::db::redis::RedisPool;

#[async_trait]
pub trait TransientStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Returns the value and deletes it in one step. A second call for the
    /// same key, or a call after expiry, yields `None`.
    async fn take_once(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Drops expired entries, returning how many were removed.
    async fn purge_expired(&self) -> anyhow::Result<u64>;
}

pub struct RedisTransientStore {
    pool: RedisPool,
}

impl RedisTransientStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransientStore for RedisTransientStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let span = tracing::debug_span!("redis_transient_put", key);
        async move {
            let mut conn = self.pool.get().await?;
            redis::pipe()
                .atomic()
                .set_ex(key, value, ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut *conn)
                .await?;
            Ok::<_, anyhow::Error>(())
        }
        .instrument(span)
        .await
    }

    async fn take_once(&self, key: &str) -> anyhow::Result<Option<String>> {
        let span = tracing::debug_span!("redis_transient_take", key);
        async move {
            let mut conn = self.pool.get().await?;
            let (value, _deleted) = redis::pipe()
                .atomic()
                .get(key)
                .del(key)
                .query_async::<_, (Option<String>, i64)>(&mut *conn)
                .await?;
            Ok::<_, anyhow::Error>(value)
        }
        .instrument(span)
        .await
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        // Redis expires keys on its own.
        Ok(0)
    }
}

#[derive(Default)]
pub struct MemoryTransientStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTransientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransientStore for MemoryTransientStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn take_once(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .remove(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value))
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| now < *expires_at);
        Ok((before - entries.len()) as u64)
    }
}

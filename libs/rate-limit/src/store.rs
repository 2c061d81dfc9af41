//! Counter store backends
//!
//! The limiter only needs two operations: an atomic increment-and-read with a
//! TTL, and a plain read. Redis backs the shared fleet-wide store; the memory
//! backend serves single-instance deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Shared counter storage used by the sliding-window limiter
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment a counter and return the post-increment value.
    /// The key expires `ttl` after its first increment.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Read a counter, treating missing or expired keys as zero.
    async fn get(&self, key: &str) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        (**self).incr(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        (**self).get(key).await
    }
}

/// In-process counter store
#[derive(Clone, Default)]
pub struct MemoryStore {
    counters: Arc<DashMap<String, (u64, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) counters
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| (0, now + ttl));

        // An expired slot is recycled in place
        if entry.value().1 <= now {
            *entry.value_mut() = (0, now + ttl);
        }

        entry.value_mut().0 += 1;
        Ok(entry.value().0)
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        match self.counters.get(key) {
            Some(entry) if entry.value().1 > Instant::now() => Ok(entry.value().0),
            _ => Ok(0),
        }
    }
}

/// Redis-backed counter store shared by all gateway instances
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let count: u64 = conn.incr(key, 1).await?;

        // TTL attaches on the first increment only; later increments inherit it
        if count == 1 {
            let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        }

        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_incr_is_cumulative() {
        let store = MemoryStore::new();

        assert_eq!(store.incr("k", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr("k", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn memory_expired_counter_reads_zero_and_recycles() {
        let store = MemoryStore::new();

        store.incr("k", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.unwrap(), 0);
        assert_eq!(store.incr("k", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_missing_key_reads_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_concurrent_increments_all_count() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();

        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr("shared", Duration::from_secs(60)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("shared").await.unwrap(), 50);
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn redis_incr_round_trip() {
        let client = redis::Client::open("redis://localhost:6379").unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        let store = RedisStore::new(conn);

        let key = format!("test:counter:{}", std::process::id());
        let first = store.incr(&key, Duration::from_secs(5)).await.unwrap();
        let second = store.incr(&key, Duration::from_secs(5)).await.unwrap();

        assert_eq!(second, first + 1);
    }
}

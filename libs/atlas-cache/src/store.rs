//! Cache storage backends
//!
//! Entries are opaque bytes with a TTL. Expired entries read as absent no
//! matter when they are physically evicted. Pattern deletes use glob-style
//! `*` wildcards; the Redis backend walks SCAN cursors instead of KEYS so
//! invalidation never blocks the store.

use crate::error::CacheResult;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Storage operations shared by the memory and Redis backends
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Delete every key matching a glob pattern, returning the count removed
    async fn del_pattern(&self, pattern: &str) -> CacheResult<usize>;
}

/// Glob matcher supporting `*` wildcards, used for local pattern eviction
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    fn matches(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], k) || (!k.is_empty() && matches(p, &k[1..]))
            }
            (Some(pc), Some(kc)) if pc == kc => matches(&p[1..], &k[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), key.as_bytes())
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache tier
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Spawn a periodic sweep dropping physically expired entries
    pub fn start_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                entries.retain(|_, entry| entry.expires_at > now);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        // The read guard is gone by now, safe to evict the stale entry
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        Ok(before - self.entries.len())
    }
}

/// Redis cache tier shared by all gateway instances
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
impl CacheStore for RedisStore {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.redis.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let mut pipe = Pipeline::new();
                for key in &keys {
                    pipe.del(key);
                }
                pipe.query_async::<_, ()>(&mut conn).await?;
                deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, deleted, "shared cache pattern delete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_wildcards() {
        assert!(glob_match("search:*", "search:abc123"));
        assert!(glob_match("entity:*:neighbors", "entity:42:neighbors"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("search:*", "entity:42"));
        assert!(!glob_match("entity:*:neighbors", "entity:42"));
    }

    #[tokio::test]
    async fn memory_round_trip() {
        let store = MemoryStore::new();
        store
            .set_raw("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get_raw("k").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn memory_expired_entry_is_absent() {
        let store = MemoryStore::new();
        store
            .set_raw("k", b"value".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get_raw("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_pattern_delete_removes_matches_only() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_raw("user:1", b"a".to_vec(), ttl).await.unwrap();
        store.set_raw("user:2", b"b".to_vec(), ttl).await.unwrap();
        store.set_raw("post:1", b"c".to_vec(), ttl).await.unwrap();

        let deleted = store.del_pattern("user:*").await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(store.get_raw("user:1").await.unwrap(), None);
        assert!(store.get_raw("post:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_sweeper_evicts_expired_entries() {
        let store = MemoryStore::new();
        store
            .set_raw("k", b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();

        let handle = store.start_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert_eq!(store.len(), 0);
    }
}

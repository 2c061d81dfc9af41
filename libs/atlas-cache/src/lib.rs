//! Atlas distributed cache
//!
//! Two-tier response cache for the gateway: a process-local tier for entries
//! this instance produced, and an optional shared Redis tier visible to the
//! whole fleet. Provides:
//! - cache-aside `get_or_compute` with per-key single-flight within an
//!   instance (concurrent misses collapse to one computation)
//! - write-through population after authoritative writes
//! - pattern invalidation broadcast to every instance over Redis pub/sub
//! - unified key schema with versioning
//!
//! Entries past their TTL are treated as absent regardless of when they are
//! physically evicted. Cache backend failures degrade to a miss; they never
//! fail the request.
//!
//! # Example
//!
//! ```no_run
//! use atlas_cache::{AtlasCache, CacheKey};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = AtlasCache::local_only();
//!
//!     let results: Vec<String> = cache
//!         .get_or_compute(&CacheKey::search("q-hash"), Duration::from_secs(30), || async {
//!             Ok::<_, String>(vec!["doc-1".to_string()])
//!         })
//!         .await
//!         .unwrap();
//!
//!     cache.invalidate(&CacheKey::search_pattern()).await;
//!     drop(results);
//! }
//! ```

mod error;
mod invalidation;
mod keys;
mod metrics;
mod store;

pub use error::{CacheError, CacheResult};
pub use invalidation::{
    InvalidationMessage, InvalidationPublisher, InvalidationSubscriber, INVALIDATION_CHANNEL,
};
pub use keys::{CacheKey, CACHE_VERSION};
pub use metrics::CacheMetrics;
pub use store::{CacheStore, MemoryStore, RedisStore};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Two-tier cache with single-flight computation and broadcast invalidation
#[derive(Clone)]
pub struct AtlasCache {
    local: MemoryStore,
    shared: Option<RedisStore>,
    publisher: Option<InvalidationPublisher>,
    inflight: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AtlasCache {
    pub fn new(
        local: MemoryStore,
        shared: Option<RedisStore>,
        publisher: Option<InvalidationPublisher>,
    ) -> Self {
        Self {
            local,
            shared,
            publisher,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Single-instance cache without a shared tier (tests, degraded mode)
    pub fn local_only() -> Self {
        Self::new(MemoryStore::new(), None, None)
    }

    /// Randomize TTLs by +0-10% so hot entries do not expire in lockstep
    fn jittered(ttl: Duration) -> Duration {
        use rand::Rng;
        let jitter = rand::thread_rng().gen_range(0.0..0.1);
        ttl + Duration::from_secs_f64(ttl.as_secs_f64() * jitter)
    }

    /// Read a typed entry, local tier first, then shared
    ///
    /// Backend failures and corrupt entries read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.local.get_raw(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    CacheMetrics::record_hit(key, "local");
                    return Some(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "corrupt local cache entry, dropping");
                    let _ = self.local.del(key).await;
                }
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "local cache read failed"),
        }

        if let Some(shared) = &self.shared {
            match shared.get_raw(key).await {
                Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                    Ok(value) => {
                        CacheMetrics::record_hit(key, "shared");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "corrupt shared cache entry, dropping");
                        let _ = shared.del(key).await;
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "shared cache read failed"),
            }
        }

        CacheMetrics::record_miss(key);
        None
    }

    async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, mode: &str) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "cache serialization failed, skipping write");
                return;
            }
        };

        let ttl = Self::jittered(ttl);
        if let Err(e) = self.local.set_raw(key, bytes.clone(), ttl).await {
            warn!(key = %key, error = %e, "local cache write failed");
        }
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.set_raw(key, bytes, ttl).await {
                warn!(key = %key, error = %e, "shared cache write failed");
            }
        }
        CacheMetrics::record_write(key, mode);
    }

    /// Cache-aside read: on miss, run `compute`, store the result under `ttl`
    /// and return it
    ///
    /// Concurrent misses for the same key within this instance collapse to a
    /// single computation; the others wait and read the stored value. Only
    /// `compute`'s own error can fail the call.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let gate = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // Another caller may have filled the entry while we waited
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        debug!(key = %key, "cache miss, computing");
        let value = compute().await?;
        self.set(key, &value, ttl, "aside").await;

        drop(_guard);
        self.inflight
            .remove_if(key, |_, gate| Arc::strong_count(gate) <= 1);

        Ok(value)
    }

    /// Write-through population: update the cache entry right after the
    /// authoritative write, avoiding the invalidate-then-miss window
    pub async fn write_through<T: Serialize>(&self, key: &str, ttl: Duration, value: &T) {
        self.set(key, value, ttl, "write_through").await;
    }

    /// Drop matching entries locally and in the shared tier, then broadcast
    /// the pattern so every other instance does the same
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let dropped = self.evict(pattern).await;
        CacheMetrics::record_invalidation("local");

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(pattern).await {
                warn!(pattern = %pattern, error = %e, "invalidation broadcast failed");
            }
        }

        dropped
    }

    /// Apply an invalidation received from another instance (no re-broadcast)
    pub async fn apply_invalidation(&self, message: &InvalidationMessage) -> usize {
        CacheMetrics::record_invalidation("broadcast");
        self.evict(&message.pattern).await
    }

    async fn evict(&self, pattern: &str) -> usize {
        let mut dropped = match self.local.del_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "local pattern eviction failed");
                0
            }
        };

        if let Some(shared) = &self.shared {
            match shared.del_pattern(pattern).await {
                Ok(n) => dropped += n,
                Err(e) => warn!(pattern = %pattern, error = %e, "shared pattern eviction failed"),
            }
        }

        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn computes_once_then_serves_from_cache() {
        let cache = AtlasCache::local_only();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: String = cache
                .get_or_compute("v1:search:q", Duration::from_secs(30), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("results".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "results");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_to_one_computation() {
        let cache = AtlasCache::local_only();
        let calls = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("v1:entity:42", Duration::from_secs(30), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(7u64)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_error_propagates_and_caches_nothing() {
        let cache = AtlasCache::local_only();

        let result: Result<u64, String> = cache
            .get_or_compute("v1:entity:err", Duration::from_secs(30), || async {
                Err("downstream failed".to_string())
            })
            .await;
        assert!(result.is_err());

        // The failed computation left no entry behind
        let cached: Option<u64> = cache.get("v1:entity:err").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn invalidate_pattern_forces_recompute() {
        let cache = AtlasCache::local_only();
        let calls = Arc::new(AtomicU32::new(0));

        for id in ["v1:source:1", "v1:source:2"] {
            let calls = calls.clone();
            let _: String = cache
                .get_or_compute(id, Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("data".into())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let dropped = cache.invalidate("v1:source:*").await;
        assert_eq!(dropped, 2);

        let calls2 = calls.clone();
        let _: String = cache
            .get_or_compute("v1:source:1", Duration::from_secs(60), move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("fresh".into())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn write_through_is_immediately_visible() {
        let cache = AtlasCache::local_only();

        cache
            .write_through("v1:source:9", Duration::from_secs(60), &"fresh".to_string())
            .await;

        let value: Option<String> = cache.get("v1:source:9").await;
        assert_eq!(value.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn expired_entry_is_recomputed() {
        let cache = AtlasCache::local_only();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let _: u64 = cache
                .get_or_compute("v1:search:short", Duration::from_millis(10), move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(1)
                    }
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broadcast_invalidation_evicts_without_republishing() {
        let cache = AtlasCache::local_only();
        cache
            .write_through("v1:entity:7", Duration::from_secs(60), &1u64)
            .await;

        let message = InvalidationMessage::new("v1:entity:*", "other-instance");
        let dropped = cache.apply_invalidation(&message).await;

        assert_eq!(dropped, 1);
        let gone: Option<u64> = cache.get("v1:entity:7").await;
        assert!(gone.is_none());
    }
}

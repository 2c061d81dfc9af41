//! Prometheus metrics for cache behavior

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static CACHE_HITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_cache_hits_total",
        "Cache hits by key family and tier",
        &["family", "tier"]
    )
    .expect("Failed to register cache hits metric")
});

static CACHE_MISSES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_cache_misses_total",
        "Cache misses by key family",
        &["family"]
    )
    .expect("Failed to register cache misses metric")
});

static CACHE_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_cache_writes_total",
        "Cache writes by key family and mode",
        &["family", "mode"]
    )
    .expect("Failed to register cache writes metric")
});

static CACHE_INVALIDATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_cache_invalidations_total",
        "Pattern invalidations by origin",
        &["origin"]
    )
    .expect("Failed to register cache invalidations metric")
});

fn family(key: &str) -> &str {
    crate::keys::CacheKey::family(key).unwrap_or("other")
}

pub struct CacheMetrics;

impl CacheMetrics {
    pub fn record_hit(key: &str, tier: &str) {
        CACHE_HITS.with_label_values(&[family(key), tier]).inc();
    }

    pub fn record_miss(key: &str) {
        CACHE_MISSES.with_label_values(&[family(key)]).inc();
    }

    pub fn record_write(key: &str, mode: &str) {
        CACHE_WRITES.with_label_values(&[family(key), mode]).inc();
    }

    pub fn record_invalidation(origin: &str) {
        CACHE_INVALIDATIONS.with_label_values(&[origin]).inc();
    }
}

//! Sliding-window limiter over bucketed counters
//!
//! The window is split into sub-window buckets; an incoming request
//! atomically increments the current bucket, then the trailing buckets are
//! summed to approximate a true sliding window without unbounded memory.

use crate::store::{CounterStore, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, serde::Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the oldest contributing bucket leaves the window
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit of {limit} exceeded, resets at {reset_at}")]
    Exceeded {
        limit: u32,
        reset_at: DateTime<Utc>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sliding-window rate limiter
#[derive(Clone)]
pub struct SlidingWindowLimiter<S> {
    store: S,
    sub_windows: u64,
}

impl<S: CounterStore> SlidingWindowLimiter<S> {
    pub fn new(store: S) -> Self {
        Self::with_sub_windows(store, 6)
    }

    pub fn with_sub_windows(store: S, sub_windows: u64) -> Self {
        Self {
            store,
            sub_windows: sub_windows.max(1),
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    fn bucket_len_secs(&self, window: Duration) -> u64 {
        (window.as_secs().max(1) / self.sub_windows).max(1)
    }

    /// Record a request for `key` and decide whether it is within `limit`
    /// over the trailing `window`.
    ///
    /// The request is counted whether or not it is allowed, so a client that
    /// keeps hammering a denied key does not sneak through early.
    pub async fn check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Decision, StoreError> {
        let bucket_len = self.bucket_len_secs(window);
        let contributing = (window.as_secs().max(1) / bucket_len).max(1);
        let current_index = Self::now_secs() / bucket_len;
        let oldest_index = current_index.saturating_sub(contributing - 1);

        // Buckets outlive the window by one bucket to cover edge skew
        let ttl = Duration::from_secs(bucket_len * (contributing + 1));
        let mut total = self
            .store
            .incr(&format!("{key}:{current_index}"), ttl)
            .await?;

        for index in oldest_index..current_index {
            total += self.store.get(&format!("{key}:{index}")).await?;
        }

        let allowed = total <= limit as u64;
        let remaining = (limit as u64).saturating_sub(total) as u32;
        let reset_epoch = (oldest_index + contributing) * bucket_len;
        let reset_at = Utc
            .timestamp_opt(reset_epoch as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);

        if !allowed {
            debug!(key = %key, total, limit, "rate limit exceeded");
        }

        Ok(Decision {
            allowed,
            limit,
            remaining,
            reset_at,
        })
    }

    /// Like [`check`](Self::check), but denial is an error carrying the reset
    /// time for client backoff guidance.
    pub async fn enforce(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Decision, RateLimitError> {
        let decision = self.check(key, limit, window).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(RateLimitError::Exceeded {
                limit,
                reset_at: decision.reset_at,
            })
        }
    }
}

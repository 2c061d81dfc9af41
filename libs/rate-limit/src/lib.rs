//! Sliding-window rate limiting for the Atlas gateway
//!
//! Requests are counted in sub-window buckets held in a shared counter store,
//! so every gateway instance increments the same counters and the limit holds
//! fleet-wide. The bucket increment is a single atomic operation against the
//! store; there is no check-then-increment race.
//!
//! # Example
//!
//! ```no_run
//! use rate_limit::{keys, MemoryStore, SlidingWindowLimiter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = SlidingWindowLimiter::new(MemoryStore::new());
//!
//!     let decision = limiter
//!         .check(&keys::user("42", "search"), 100, Duration::from_secs(60))
//!         .await
//!         .unwrap();
//!
//!     if !decision.allowed {
//!         println!("back off until {}", decision.reset_at);
//!     }
//! }
//! ```

pub mod keys;
mod sliding_window;
mod store;

pub use sliding_window::{Decision, RateLimitError, SlidingWindowLimiter};
pub use store::{CounterStore, MemoryStore, RedisStore, StoreError};

/// Retry executor with exponential backoff and jitter
///
/// Callers classify each failure as `Transient` (worth another attempt) or
/// `Fatal` (short-circuits immediately); open circuits and client errors are
/// always fatal so a retry chain never hammers an excluded dependency.
use crate::metrics::RetryMetrics;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff
    pub max_backoff: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Randomize each backoff by ±30%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Failure classification produced by the operation under retry
#[derive(Debug)]
pub enum RetryableError<E> {
    /// Worth another attempt (connection reset, 5xx, timeout)
    Transient(E),
    /// Never retried (open circuit, validation, 4xx)
    Fatal(E),
}

impl<E> RetryableError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryableError::Transient(e) | RetryableError::Fatal(e) => e,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("non-retryable failure on attempt {attempts}: {source}")]
    Fatal { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    /// Number of attempts that were actually made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal { source, .. } => source,
        }
    }
}

/// Execute an operation under the given retry policy
///
/// The closure receives the 1-based attempt number. The first attempt runs
/// immediately; each transient failure waits
/// `min(initial_backoff * multiplier^(attempt-1), max_backoff)` before the
/// next attempt.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RetryableError<E>>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f(attempt).await {
            Ok(result) => {
                RetryMetrics::record_attempts("success", attempt);
                return Ok(result);
            }
            Err(RetryableError::Fatal(source)) => {
                RetryMetrics::record_attempts("fatal", attempt);
                return Err(RetryError::Fatal { attempts: attempt, source });
            }
            Err(RetryableError::Transient(last)) => {
                if attempt == max_attempts {
                    warn!(attempts = attempt, error = %last, "retries exhausted");
                    RetryMetrics::record_attempts("exhausted", attempt);
                    return Err(RetryError::Exhausted { attempts: attempt, last });
                }

                let delay = backoff_delay(policy, attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last,
                    "transient failure, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns within max_attempts")
}

/// Backoff before attempt `attempt + 1`
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.multiplier.powi(attempt.saturating_sub(1) as i32);
    let base = (policy.initial_backoff.as_millis() as f64 * exp)
        .min(policy.max_backoff.as_millis() as f64);

    if policy.jitter {
        let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base * factor) as u64)
    } else {
        Duration::from_millis(base as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn first_attempt_success_makes_one_call() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_policy(3), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RetryableError<String>>(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_recover_within_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_policy(3), move |_| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RetryableError::Transient("connection reset"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_attempted_exactly_max_times() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_policy(3), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(RetryableError::Transient("down")) }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failure_short_circuits_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_policy(5), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(RetryableError::Fatal("bad request")) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Fatal { attempts: 1, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let _ = with_retry(&policy, |_| async {
            Err::<(), _>(RetryableError::Transient("down"))
        })
        .await;

        // 100ms after attempt 1 plus 200ms after attempt 2
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn backoff_is_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            multiplier: 10.0,
            jitter: false,
        };

        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(&policy, 9), Duration::from_millis(20));
    }

    #[test]
    fn attempt_count_is_recoverable_from_error() {
        let err: RetryError<&str> = RetryError::Exhausted {
            attempts: 3,
            last: "down",
        };
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), "down");
    }
}

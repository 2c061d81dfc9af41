/// Deadlines for outbound calls
///
/// Every call leaving the gateway carries an explicit deadline; exceeding it
/// counts as a failure for breaker purposes and aborts the in-flight work.
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum DeadlineError {
    #[error("deadline of {0:?} exceeded")]
    Elapsed(Duration),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// Run a future under a deadline
pub async fn with_deadline<F, T>(deadline: Duration, future: F) -> Result<T, DeadlineError>
where
    F: Future<Output = T>,
{
    timeout(deadline, future)
        .await
        .map_err(|_| DeadlineError::Elapsed(deadline))
}

/// Run a fallible future under a deadline
pub async fn with_deadline_result<F, T, E>(
    deadline: Duration,
    future: F,
) -> Result<T, DeadlineError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match timeout(deadline, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::OperationFailed(e.to_string())),
        Err(_) => Err(DeadlineError::Elapsed(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let result = with_deadline(Duration::from_secs(1), async { 9 }).await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn aborts_once_deadline_elapses() {
        let result = with_deadline(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            9
        })
        .await;

        assert!(matches!(result, Err(DeadlineError::Elapsed(_))));
    }

    #[tokio::test]
    async fn inner_failure_is_not_reported_as_elapsed() {
        let result =
            with_deadline_result(Duration::from_secs(1), async { Err::<(), _>("boom") }).await;

        assert!(matches!(result, Err(DeadlineError::OperationFailed(_))));
    }
}

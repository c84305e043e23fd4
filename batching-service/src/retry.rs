use crate::error::BatchingResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry around a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds), doubled per attempt
    pub backoff_ms: u64,
    /// Upper bound for a single delay (milliseconds)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempts are exhausted. The last error is returned unchanged.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut f: F) -> BatchingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BatchingResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after conflict"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchingError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_conflict_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { backoff_ms: 1, ..Default::default() };

        let result = policy
            .retry("assign", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BatchingError::Conflict("serialization failure".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { backoff_ms: 1, ..Default::default() };

        let result: BatchingResult<()> = policy
            .retry("assign", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BatchingError::Conflict("deadlock".into()))
            })
            .await;

        assert!(matches!(result, Err(BatchingError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);

        let result: BatchingResult<()> = RetryPolicy::default()
            .retry("assign", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BatchingError::Storage("disk full".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy { max_attempts: 10, backoff_ms: 100, max_backoff_ms: 250 };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(5), Duration::from_millis(250));
    }
}

//! Bounded retry with exponential backoff and per-attempt timeouts

use super::StorageError;
use crate::observability::WatchdogMetrics;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single attempt
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.operation_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout {
                    operation,
                    timeout_ms: self.operation_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempts > self.max_retries => {
                    return Err(StorageError::RetriesExhausted {
                        operation,
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    debug!(
                        operation,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Storage operation failed, retrying"
                    );
                    WatchdogMetrics::new().inc_storage_retries();
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            operation_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_policy()
            .run("append", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::Unavailable("connection refused".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_policy()
            .run("append", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::Unavailable("down".into()))
            })
            .await;

        match result {
            Err(StorageError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_operation_times_out() {
        let result: Result<(), _> = fast_policy()
            .run("range", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(StorageError::RetriesExhausted { last, .. }) => {
                assert!(matches!(*last, StorageError::Timeout { operation: "range", .. }))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_policy()
            .run("range", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::Codec("bad block".into()))
            })
            .await;

        assert!(matches!(result, Err(StorageError::Codec(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

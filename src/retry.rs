//! Retry logic with configurable backoff
//!
//! [`execute_with_retry`] wraps a fallible async operation with a
//! [`RetryConfig`] policy. Every failure of the wrapped operation is retried
//! identically (no cause-based classification) until the policy's attempt
//! budget is spent; the last error is then returned inside
//! [`Error::ExhaustedRetries`]. Cancellation is observed before every attempt
//! and while sleeping between attempts.
//!
//! # Example
//!
//! ```no_run
//! use archive_harvest::config::RetryConfig;
//! use archive_harvest::retry::execute_with_retry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> archive_harvest::Result<()> {
//! let cancel = CancellationToken::new();
//! let body = execute_with_retry(&RetryConfig::page_fetch(), &cancel, "fetch index", || async {
//!     Ok::<_, archive_harvest::Error>("<html></html>".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Cancellation is not a failure of the operation
            Error::Interrupted => false,
            // Misconfiguration and bookkeeping bugs do not heal with time
            Error::Config { .. } | Error::Batch(_) => false,
            // Everything an operation can fail with is retried the same way,
            // including permanent HTTP statuses such as 404
            Error::Network(_)
            | Error::HttpStatus { .. }
            | Error::Io(_)
            | Error::Filesystem { .. }
            | Error::Parse(_)
            | Error::IncompleteDownload { .. }
            | Error::ExhaustedRetries { .. }
            | Error::Csv(_)
            | Error::Serialization(_)
            | Error::Other(_) => true,
        }
    }
}

/// Execute an async operation under a retry policy
///
/// # Arguments
///
/// * `config` - Retry policy (attempt budget and backoff function)
/// * `cancel` - Token that aborts the loop with [`Error::Interrupted`]
/// * `operation_name` - Short description used in logs and in the terminal error
/// * `operation` - Async closure producing one attempt
///
/// # Returns
///
/// The first successful result. After `config.max_attempts` failed attempts,
/// [`Error::ExhaustedRetries`] carrying the last error. Non-retryable errors
/// are returned unchanged after the attempt that produced them.
pub async fn execute_with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempts = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                if !e.is_interrupted() {
                    tracing::error!(
                        operation = operation_name,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
            Err(e) if attempt < max_attempts => {
                let delay = config.delay_for(attempt);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Interrupted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                tracing::error!(
                    operation = operation_name,
                    error = %e,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(Error::ExhaustedRetries {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::HttpStatus {
            status: 503,
            url: "http://example.invalid/".to_string(),
        }
    }

    /// Runs an operation that fails `failures` times, returning the attempt start times
    async fn run_failing(
        config: &RetryConfig,
        failures: u32,
    ) -> (Result<u32>, Vec<Instant>) {
        let cancel = CancellationToken::new();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicU32::new(0));

        let result = execute_with_retry(config, &cancel, "test op", || {
            let starts = starts.clone();
            let counter = counter.clone();
            async move {
                starts.lock().unwrap().push(Instant::now());
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(transient())
                } else {
                    Ok(n + 1)
                }
            }
        })
        .await;

        let starts = starts.lock().unwrap().clone();
        (result, starts)
    }

    fn gaps(starts: &[Instant]) -> Vec<Duration> {
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_no_retry() {
        let (result, starts) = run_failing(&RetryConfig::download(), 0).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(starts.len(), 1, "should only call once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_policy_succeeds_on_fifth_attempt_with_doubling_delays() {
        let (result, starts) = run_failing(&RetryConfig::download(), 4).await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(
            gaps(&starts),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_policy_exhausts_after_three_attempts() {
        let (result, starts) = run_failing(&RetryConfig::page_fetch(), u32::MAX).await;
        assert_eq!(starts.len(), 3, "attempts must not exceed max_attempts");
        assert_eq!(
            gaps(&starts),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );

        match result.unwrap_err() {
            Error::ExhaustedRetries {
                attempts, last, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::HttpStatus { status: 503, .. }));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_sleeps() {
        let config = RetryConfig {
            max_attempts: 1,
            base_delay: Duration::from_secs(30),
            backoff: Backoff::Linear,
            max_delay: None,
            jitter: false,
        };
        let begin = Instant::now();
        let (result, starts) = run_failing(&config, u32::MAX).await;
        assert!(result.is_err());
        assert_eq!(starts.len(), 1);
        assert_eq!(begin.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&RetryConfig::download(), &cancel, "test op", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::config("workers", "bad"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Config { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_interrupts() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let result = execute_with_retry(&RetryConfig::page_fetch(), &cancel, "test op", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&RetryConfig::page_fetch(), &cancel, "test op", || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn test_only_interrupt_and_internal_errors_are_final() {
        assert!(transient().is_retryable());
        assert!(
            Error::HttpStatus {
                status: 404,
                url: String::new()
            }
            .is_retryable()
        );
        assert!(!Error::Interrupted.is_retryable());
        assert!(!Error::config("x", "y").is_retryable());
    }
}

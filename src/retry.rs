//! Retry logic with exponential backoff for network operations.
//!
//! Used for notarization submissions, release uploads and remote cache
//! access. Unrecoverable errors (see [`PipelineError::is_recoverable`]) are
//! returned immediately. Every attempt may carry its own timeout, and the whole
//! loop is bounded by an absolute deadline so a hung service surfaces as
//! [`PipelineError::Timeout`] instead of suspending the job forever.

use crate::error::{PipelineError, Result};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Bounds for one retried operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = try once, no retries)
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
    /// Ceiling for a single backoff delay
    pub max_delay: Duration,
    /// Deadline for the whole retry loop
    pub absolute_timeout: Duration,
    /// Deadline for one attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            absolute_timeout: Duration::from_secs(1800),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry count and default delays
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retry an async operation with exponential backoff
///
/// # Arguments
/// * `operation` - Async closure producing one attempt
/// * `policy` - Retry bounds
/// * `operation_name` - Human-readable name for logging
/// * `cancel` - Cancellation token observed during attempts and backoff
pub async fn retry_with_backoff<F, T, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let deadline = start_time + policy.absolute_timeout;

    let mut attempts = 0;

    loop {
        if Instant::now() >= deadline {
            return Err(PipelineError::Timeout {
                operation: operation_name.to_string(),
                seconds: start_time.elapsed().as_secs_f64(),
            });
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = run_attempt(&mut operation, policy, operation_name, deadline) => outcome,
        };

        match outcome {
            Ok(result) => {
                if attempts > 0 {
                    log::info!("{} succeeded after {} retry(ies)", operation_name, attempts);
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_recoverable() {
                    log::error!("{} failed with unrecoverable error: {}", operation_name, e);
                    return Err(e);
                }

                if attempts >= policy.max_retries {
                    log::error!("{} failed after {} attempt(s)", operation_name, attempts + 1);
                    return Err(e);
                }

                attempts += 1;

                let remaining_time = deadline.saturating_duration_since(Instant::now());
                let actual_wait = policy.delay_for(attempts).min(remaining_time);

                if actual_wait.is_zero() {
                    return Err(PipelineError::Timeout {
                        operation: operation_name.to_string(),
                        seconds: start_time.elapsed().as_secs_f64(),
                    });
                }

                log::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:.1}s",
                    operation_name,
                    attempts,
                    policy.max_retries + 1,
                    e,
                    actual_wait.as_secs_f64()
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(actual_wait) => {}
                }
            }
        }
    }
}

async fn run_attempt<F, T, Fut>(
    operation: &mut F,
    policy: &RetryPolicy,
    operation_name: &str,
    deadline: Instant,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    let limit = policy
        .attempt_timeout
        .map_or(remaining, |per_attempt| per_attempt.min(remaining));
    let started = Instant::now();

    match tokio::time::timeout(limit, operation()).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            operation: operation_name.to_string(),
            seconds: started.elapsed().as_secs_f64(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SignError, VerifyError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            absolute_timeout: Duration::from_secs(5),
            attempt_timeout: None,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::from(SignError::NotaryService {
                        reason: "503".to_string(),
                    }))
                } else {
                    Ok("accepted")
                }
            },
            &fast_policy(3),
            "notarize",
            &cancel,
        )
        .await;

        assert_eq!(result.ok(), Some("accepted"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unrecoverable_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::from(VerifyError::Mismatch {
                    expected: "1".to_string(),
                    actual: "2".to_string(),
                }))
            },
            &fast_policy(5),
            "verify",
            &cancel,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::from(SignError::NotaryService {
                    reason: "down".to_string(),
                }))
            },
            &fast_policy(2),
            "notarize",
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Sign(SignError::NotaryService { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hung_attempt_becomes_timeout() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 0,
            attempt_timeout: Some(Duration::from_millis(20)),
            ..fast_policy(0)
        };

        let result: Result<()> = retry_with_backoff(
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
            &policy,
            "notarize",
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Timeout { .. })));
    }

    #[tokio::test]
    async fn cancellation_interrupts_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = retry_with_backoff(
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
            &fast_policy(3),
            "upload",
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}

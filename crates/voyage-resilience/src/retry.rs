//! Retry with per-attempt timeout and exponential backoff.

use crate::timeout::with_timeout;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use voyage_core::{Stage, VoyageError};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry; doubled for every further retry
    pub backoff_base: Duration,
    /// Random spread applied to each delay, as a fraction in `[0, 1]`
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            jitter: 0.0,
        }
    }
}

/// Timeout and retry budget for one kind of call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    /// Deadline for each attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl StagePolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }

    /// Default policy for a planning stage
    #[must_use]
    pub const fn for_stage(stage: Stage) -> Self {
        let secs = match stage {
            Stage::Intent => 30,
            Stage::Discovery | Stage::Refine => 45,
            Stage::Optimization => 90,
        };
        Self::new(Duration::from_secs(secs), 2)
    }
}

/// Executes fallible async operations with retries
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new executor
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after failed attempt `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.config.backoff_base * 2u32.pow(exponent);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Run `f` up to `max_retries + 1` times, each attempt raced against
    /// `timeout`.
    ///
    /// Errors that are not retryable are returned straight away.
    ///
    /// # Errors
    /// Returns `VoyageError::RetriesExhausted` naming `operation` when the
    /// last attempt fails, or the first non-retryable error
    pub async fn run_with_retry<F, Fut, T>(
        &self,
        operation: &str,
        mut f: F,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<T, VoyageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VoyageError>>,
    {
        let max_attempts = max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            match with_timeout(operation, timeout, f()).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    debug!(operation, attempt, error = %error, "Non-retryable error");
                    return Err(error);
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(VoyageError::retries_exhausted(operation, attempt, error));
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run `f` under a stage policy
    ///
    /// # Errors
    /// See [`RetryExecutor::run_with_retry`]
    pub async fn run<F, Fut, T>(
        &self,
        operation: &str,
        policy: StagePolicy,
        f: F,
    ) -> Result<T, VoyageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VoyageError>>,
    {
        self.run_with_retry(operation, f, policy.max_retries, policy.timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> VoyageError {
        VoyageError::provider("gemini", "service unavailable", Some(503), true)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_attempts_and_backoff_schedule() {
        let executor = RetryExecutor::default();
        let attempts = Mutex::new(Vec::new());

        let result: Result<(), VoyageError> = executor
            .run_with_retry(
                "intent",
                || {
                    attempts.lock().push(Instant::now());
                    async { Err(transient()) }
                },
                2,
                Duration::from_secs(30),
            )
            .await;

        let attempts = attempts.into_inner();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(1));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(2));

        let error = result.expect_err("all attempts fail");
        assert!(error.to_string().contains("intent"));
        match error {
            VoyageError::RetriesExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "intent");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, VoyageError::Provider { .. }));
            }
            other => panic!("Expected retries exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result = executor
            .run_with_retry(
                "discovery",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(transient())
                        } else {
                            Ok("found")
                        }
                    }
                },
                2,
                Duration::from_secs(45),
            )
            .await;

        assert_eq!(result.expect("second attempt succeeds"), "found");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), VoyageError> = executor
            .run_with_retry(
                "optimization",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(600)).await;
                        Ok(())
                    }
                },
                1,
                Duration::from_secs(90),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(90 + 1 + 90));
        match result {
            Err(VoyageError::RetriesExhausted { source, .. }) => {
                assert!(matches!(*source, VoyageError::Timeout { .. }));
            }
            other => panic!("Expected retries exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), VoyageError> = executor
            .run_with_retry(
                "generate",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(VoyageError::provider(
                            "gemini",
                            "API key not valid",
                            Some(400),
                            false,
                        ))
                    }
                },
                2,
                Duration::from_secs(30),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(VoyageError::Provider { .. })));
    }

    #[test]
    fn test_delay_schedule_without_jitter() {
        let executor = RetryExecutor::new(RetryConfig {
            backoff_base: Duration::from_millis(500),
            jitter: 0.0,
        });

        assert_eq!(executor.delay_for(1), Duration::from_millis(500));
        assert_eq!(executor.delay_for(2), Duration::from_secs(1));
        assert_eq!(executor.delay_for(3), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let executor = RetryExecutor::new(RetryConfig {
            backoff_base: Duration::from_secs(1),
            jitter: 0.25,
        });

        for _ in 0..100 {
            let delay = executor.delay_for(2);
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_stage_policies() {
        assert_eq!(StagePolicy::for_stage(Stage::Intent).timeout, Duration::from_secs(30));
        assert_eq!(
            StagePolicy::for_stage(Stage::Optimization).timeout,
            Duration::from_secs(90)
        );
        assert_eq!(StagePolicy::for_stage(Stage::Refine).max_retries, 2);
    }
}

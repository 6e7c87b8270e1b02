//! Retry with exponential backoff
//!
//! Generic retry executor for gateway calls. Every gateway-calling site
//! goes through this one strategy, parameterized by an error classifier
//! that decides transient vs terminal. Terminal failures abort
//! immediately; transient ones are retried up to a hard attempt ceiling
//! with exponentially growing, capped delays.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,
    /// Maximum delay between attempts (cap)
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl From<&serena_core::config::RetryConfig> for RetryConfig {
    fn from(cfg: &serena_core::config::RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            backoff_multiplier: cfg.backoff_multiplier,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

/// Successful execution report
#[derive(Debug)]
pub struct RetryReport<T> {
    /// Value the operation produced
    pub value: T,
    /// Attempts consumed, including the successful one
    pub attempts: u32,
    /// Wall time across all attempts and delays
    pub elapsed: Duration,
}

/// Failed execution report carrying the last error
#[derive(Debug)]
pub struct RetryError<E> {
    /// Last error observed
    pub error: E,
    /// Attempts consumed
    pub attempts: u32,
    /// Wall time across all attempts and delays
    pub elapsed: Duration,
}

/// Retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay scheduled after the given attempt number (1-based).
    ///
    /// Monotonically non-decreasing in the attempt number, capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = self.config.backoff_multiplier.max(1.0).powi(exponent as i32);
        let delay = self.config.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.config.max_delay.as_secs_f64()))
    }

    /// Execute an async operation with bounded retries.
    ///
    /// `is_transient` classifies errors; a terminal error aborts without
    /// further attempts. On exhaustion the last error is returned.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<RetryReport<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();

        for attempt in 1..=self.config.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt, "Succeeded after retry"
                        );
                    }
                    return Ok(RetryReport {
                        value,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                Err(err) => {
                    if attempt == self.config.max_attempts || !is_transient(&err) {
                        warn!(
                            operation = operation_name,
                            attempt,
                            max_attempts = self.config.max_attempts,
                            error = %err,
                            "Operation failed permanently"
                        );
                        return Err(RetryError {
                            error: err,
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        });
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("loop exits via return")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeError {
        transient: bool,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake error (transient={})", self.transient)
        }
    }

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(80),
        })
    }

    #[test]
    fn test_delays_monotonic_and_capped() {
        let exec = executor(10);
        let mut prev = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = exec.delay_for_attempt(attempt);
            assert!(delay >= prev, "delay shrank at attempt {}", attempt);
            assert!(delay <= Duration::from_millis(80));
            prev = delay;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling() {
        let exec = executor(4);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<RetryReport<()>, _> = exec
            .execute(
                "always_fails",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(FakeError { transient: true })
                    }
                },
                |e: &FakeError| e.transient,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_short_circuits() {
        let exec = executor(5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<RetryReport<()>, _> = exec
            .execute(
                "terminal",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(FakeError { transient: false })
                    }
                },
                |e: &FakeError| e.transient,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let exec = executor(5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = exec
            .execute(
                "flaky",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(FakeError { transient: true })
                        } else {
                            Ok(42u32)
                        }
                    }
                },
                |e: &FakeError| e.transient,
            )
            .await
            .unwrap();

        assert_eq!(result.value, 42);
        assert_eq!(result.attempts, 3);
    }
}

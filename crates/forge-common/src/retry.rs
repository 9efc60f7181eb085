//! Retry utilities with exponential backoff and jitter.
//!
//! A [`RetryPolicy`] pairs a backoff schedule with a predicate that decides
//! which errors are worth another attempt. Anything the predicate rejects is
//! returned immediately; anything it accepts is retried until the attempt
//! budget runs out, at which point the last error is returned.
//!
//! # Example
//!
//! ```ignore
//! use forge_common::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::transient_conflicts();
//! policy
//!     .run("update-route-table", || async { store.replace_proxy(&table).await })
//!     .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Backoff schedule for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Extra random delay, as a fraction of the current delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Schedule for optimistic-concurrency writes: 200ms, x2, 10% jitter, 5 attempts
    pub fn conflict_backoff() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Fixed delay between a bounded number of attempts
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay after the given (1-based) failed attempt, before jitter
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + extra))
    }
}

/// A backoff schedule plus the rule for which errors to retry
pub struct RetryPolicy<E> {
    config: RetryConfig,
    retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retryable: self.retryable,
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// Create a policy from a schedule and a retryable-error predicate
    pub fn new(config: RetryConfig, retryable: fn(&E) -> bool) -> Self {
        Self { config, retryable }
    }

    /// Retry every error
    pub fn always(config: RetryConfig) -> Self {
        Self::new(config, |_| true)
    }

    /// Whether the predicate accepts this error
    pub fn is_retryable(&self, err: &E) -> bool {
        (self.retryable)(err)
    }
}

impl RetryPolicy<Error> {
    /// Conflict backoff, retrying only conflicts, throttling and server timeouts
    pub fn transient_conflicts() -> Self {
        Self::new(RetryConfig::conflict_backoff(), Error::is_transient)
    }
}

impl<E: std::fmt::Display> RetryPolicy<E> {
    /// Execute an async operation under this policy.
    ///
    /// The operation is re-invoked from scratch on every attempt, so callers
    /// that read-modify-write should re-read inside the closure.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !self.is_retryable(&e) => return Err(e),
                Err(e) => {
                    if self.config.max_attempts > 0 && attempt >= self.config.max_attempts {
                        error!(
                            operation = %operation_name,
                            attempt = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    let delay = self.config.jittered(self.config.delay_after(attempt));
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

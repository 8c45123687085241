//! Bounded retries with exponential backoff and jitter
//!
//! Used for calls to services outside the cluster (the version index, the
//! datapack service). Calls against the API server are never retried here:
//! a failed pass is retried by the controller's re-invocation instead.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Backoff schedule for a fallible operation
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Same schedule with a different attempt budget
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds, the error is permanent, or attempts run out
///
/// `is_transient` decides whether an error is worth another attempt; permanent
/// errors are returned immediately. Each delay is jittered to 0.5x..1.5x.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_transient(&err) {
            debug!(operation = %operation_name, error = %err, "Permanent failure, not retrying");
            return Err(err);
        }
        if attempt >= max_attempts {
            warn!(
                operation = %operation_name,
                attempts = attempt,
                error = %err,
                "Giving up after retries"
            );
            return Err(err);
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let wait = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = wait.as_millis() as u64,
            "Transient failure, retrying"
        );
        tokio::time::sleep(wait).await;
        delay = config.next_delay(delay);
    }
}

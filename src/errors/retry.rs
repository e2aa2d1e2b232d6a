use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use super::classification::{Classify, ErrorClassification};
use crate::fetch::clock::Clock;
use tracing::{debug, warn};

/// Retry configuration for outbound API calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ErrorClassification {
    /// Delay before the next attempt (0-indexed `attempt`).
    ///
    /// - RateLimitError: no extra delay, the shared bucket already holds
    ///   callers until the reset time
    /// - Default: `base * 2^attempt` plus random jitter in `[0, base)`,
    ///   capped at `max_delay`
    pub fn retry_delay(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        match self.error_type {
            "RateLimitError" => Duration::ZERO,
            _ => {
                let base = policy.base_delay.as_secs_f64();
                let exp = base * 2.0_f64.powi(attempt.min(30) as i32);
                let jitter = base * rand::random::<f64>();
                Duration::from_secs_f64((exp + jitter).min(policy.max_delay.as_secs_f64()))
            }
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Retries only if the error is classified as retryable and the attempt budget
/// is not spent. Delays are slept on `clock`.
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut factory: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match factory(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                if !classification.retryable {
                    debug!(
                        operation = operation_name,
                        error_type = classification.error_type,
                        error = %e,
                        "Non-retryable error, failing immediately"
                    );
                    return Err(e);
                }
                if attempt + 1 >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max = max_attempts,
                        error = %e,
                        "Max retries exhausted"
                    );
                    return Err(e);
                }

                let delay = classification.retry_delay(attempt, policy);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                if !delay.is_zero() {
                    clock.sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

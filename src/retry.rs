//! Retry policy: configuration plus a reusable executor that retries a
//! caller-supplied async operation with exponential backoff.

use crate::error::TuyaError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// A retry policy: how many attempts, how long to wait between them, and
/// which errors are worth retrying at all.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub retryable: fn(&TuyaError) -> bool,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        initial_delay: Duration::from_millis(0),
        max_delay: Duration::from_millis(0),
        factor: 1.0,
        retryable: TuyaError::is_retryable,
    };

    /// 3 attempts, 500ms -> 2s backoff, factor 1.5.
    pub const QUICK: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(2),
        factor: 1.5,
        retryable: TuyaError::is_retryable,
    };

    /// 3 attempts, 1s -> 10s backoff, factor 2.
    pub const STANDARD: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        factor: 2.0,
        retryable: TuyaError::is_retryable,
    };

    /// 5 attempts, 1s -> 30s backoff, factor 2.
    pub const AGGRESSIVE: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        factor: 2.0,
        retryable: TuyaError::is_retryable,
    };

    /// The delay before attempt number `attempt` (1-indexed, so the delay
    /// before the second attempt is `attempt == 2`).
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Runs `op`, retrying on failure per this policy.
    ///
    /// Rethrows immediately if the error isn't retryable per
    /// [`RetryPolicy::retryable`], or once `maxAttempts` is exhausted.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, TuyaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TuyaError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if (self.retryable)(&err) && attempts < self.max_attempts => {
                    sleep(self.delay_for(attempts)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::error::BatonError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first). `u32::MAX` retries forever.
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Execute an async operation, retrying errors that report themselves retryable.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, BatonError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BatonError>>,
    {
        self.execute_if(BatonError::is_retryable, operation).await
    }

    /// Execute an async operation, retrying errors accepted by `should_retry`.
    pub async fn execute_if<F, Fut, T, P>(
        &self,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, BatonError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BatonError>>,
        P: Fn(&BatonError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if !should_retry(&e) || attempt >= max_attempts {
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );

                    // Jitter: 75%-125% of backoff
                    let jitter_factor = 0.75 + (rand_factor() * 0.5);
                    let sleep_duration =
                        Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
                    tokio::time::sleep(sleep_duration).await;

                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.multiplier)
                            .min(self.max_backoff.as_secs_f64()),
                    );
                }
            }
        }
    }
}

/// Uniform-ish factor in [0, 1), drawn from a v4 uuid's random bits.
fn rand_factor() -> f64 {
    (uuid::Uuid::new_v4().as_u128() % 10_000) as f64 / 10_000.0
}

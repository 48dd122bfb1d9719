//! Per-minute request pacing and rate-limit retries for provider calls.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::BatonError;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiting behavior for provider calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum provider calls per rolling minute. `None` disables pacing.
    pub requests_per_minute: Option<u32>,
    /// Retry calls that fail with a rate-limit error.
    pub retry_on_rate_limit: bool,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First retry delay, in seconds.
    pub initial_retry_delay: f64,
    pub backoff_multiplier: f64,
    /// Upper bound for a retry delay, in seconds.
    pub max_retry_delay: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: None,
            retry_on_rate_limit: true,
            max_retries: 3,
            initial_retry_delay: 1.0,
            backoff_multiplier: 2.0,
            max_retry_delay: 60.0,
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: Some(requests_per_minute),
            ..Self::default()
        }
    }

    /// Reject delays and multipliers that cannot describe a backoff schedule.
    pub fn validate(&self) -> Result<(), BatonError> {
        for (field, value) in [
            ("initial_retry_delay", self.initial_retry_delay),
            ("max_retry_delay", self.max_retry_delay),
            ("backoff_multiplier", self.backoff_multiplier),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(BatonError::Configuration(format!(
                    "rate_limit.{field} must be a finite, non-negative number, got {value}"
                )));
            }
        }
        seconds("initial_retry_delay", self.initial_retry_delay)?;
        seconds("max_retry_delay", self.max_retry_delay)?;
        Ok(())
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, BatonError> {
    Duration::try_from_secs_f64(value.max(0.0)).map_err(|e| {
        BatonError::Configuration(format!("rate_limit.{field} is out of range ({value}): {e}"))
    })
}

/// Sliding-window limiter over the last minute of provider calls.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            issued: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a slot is free in the current window, then take it.
    pub async fn acquire(&self) {
        let Some(limit) = self.config.requests_per_minute.filter(|limit| *limit > 0) else {
            return;
        };

        loop {
            let wait = {
                let mut issued = self.issued.lock().await;
                let now = Instant::now();
                while issued
                    .front()
                    .is_some_and(|at| now.duration_since(*at) >= WINDOW)
                {
                    issued.pop_front();
                }
                if issued.len() < limit as usize {
                    issued.push_back(now);
                    return;
                }
                match issued.front() {
                    Some(oldest) => (*oldest + WINDOW).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting for a slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Run `operation` under the limiter, retrying rate-limit failures with backoff.
    ///
    /// A slot is reacquired before every retry.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, BatonError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BatonError>>,
    {
        let mut delay = seconds("initial_retry_delay", self.config.initial_retry_delay)?;
        let max_delay = seconds("max_retry_delay", self.config.max_retry_delay)?;
        let mut retries = 0;

        self.acquire().await;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e)
                    if self.config.retry_on_rate_limit
                        && e.is_rate_limit()
                        && retries < self.config.max_retries =>
                {
                    retries += 1;
                    let wait = match e.root() {
                        BatonError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => Duration::from_millis(*ms).max(delay),
                        _ => delay,
                    };
                    tracing::warn!(
                        retry = retries,
                        max_retries = self.config.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "Provider rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    delay = Duration::try_from_secs_f64(
                        delay.as_secs_f64() * self.config.backoff_multiplier,
                    )
                    .map_or(max_delay, |next| next.min(max_delay));
                    self.acquire().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn acquire_blocks_until_the_window_frees() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(2)));
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_limiter_never_waits() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_errors_with_growing_delay() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = limiter
            .execute_with_retry(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(BatonError::RateLimited {
                            retry_after_ms: None,
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt should succeed"), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_retries: 2,
            ..RateLimitConfig::default()
        });
        let attempts = AtomicU32::new(0);

        let err = limiter
            .execute_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(BatonError::Provider {
                        provider: "mock".into(),
                        message: "429 Too Many Requests".into(),
                    })
                }
            })
            .await
            .expect_err("rate limit should surface after retries");

        assert!(err.is_rate_limit());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let attempts = AtomicU32::new(0);

        let err = limiter
            .execute_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BatonError::user("bad config")) }
            })
            .await
            .expect_err("user error should surface");

        assert!(matches!(err, BatonError::User(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn validate_rejects_unusable_delays() {
        for config in [
            RateLimitConfig {
                initial_retry_delay: f64::INFINITY,
                ..RateLimitConfig::default()
            },
            RateLimitConfig {
                max_retry_delay: f64::NAN,
                ..RateLimitConfig::default()
            },
            RateLimitConfig {
                backoff_multiplier: -2.0,
                ..RateLimitConfig::default()
            },
            RateLimitConfig {
                max_retry_delay: 1e30,
                ..RateLimitConfig::default()
            },
        ] {
            let err = config.validate().expect_err("config should be rejected");
            assert!(matches!(err, BatonError::Configuration(_)), "{err:?}");
        }
        RateLimitConfig::default()
            .validate()
            .expect("defaults should validate");
    }

    #[tokio::test]
    async fn infinite_delay_is_a_configuration_error_not_a_panic() {
        let limiter = RateLimiter::new(RateLimitConfig {
            initial_retry_delay: f64::INFINITY,
            ..RateLimitConfig::default()
        });
        let attempts = AtomicU32::new(0);

        let err = limiter
            .execute_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BatonError>(()) }
            })
            .await
            .expect_err("infinite delay should be rejected");

        assert!(matches!(err, BatonError::Configuration(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}

//! Retry with exponential backoff
//!
//! Per-unit retry policy for transient worker failures. Retries reuse
//! the unit's cache key; the scheduler holds the cache claim across the
//! whole retry loop.

use std::future::Future;
use std::time::Duration;

use crate::error::{BraidError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_retries: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Executes operations under a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry `attempt` (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jittered_delay = if self.config.jitter > 0.0 {
            let jitter_range = capped_delay * self.config.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(jittered_delay as u64)
    }

    /// Execute an operation, retrying recoverable failures with backoff.
    ///
    /// Non-recoverable errors (see [`BraidError::is_recoverable`]) abort
    /// immediately.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_recoverable() {
                        return Err(e);
                    }

                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.calculate_delay(attempt)).await;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) if self.config.max_retries == 0 => e,
            Some(e) => BraidError::RetryExhausted {
                attempts: self.config.max_retries + 1,
                last_error: e.to_string(),
            },
            None => BraidError::RetryExhausted {
                attempts: self.config.max_retries + 1,
                last_error: "unknown error".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(retries)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(0.0)
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_backoff_multiplier(2.0)
                .with_jitter(0.0),
        );

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_respects_cap() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(300))
                .with_backoff_multiplier(2.0)
                .with_jitter(0.0),
        );

        assert_eq!(policy.calculate_delay(3), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_jitter(0.5),
        );

        for _ in 0..100 {
            let delay = policy.calculate_delay(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let policy = RetryPolicy::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_recoverable_failures() {
        let policy = RetryPolicy::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BraidError::WorkerFailure {
                            unit: "u".into(),
                            message: "transient".into(),
                        })
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries() {
        let policy = RetryPolicy::new(fast_config(2));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BraidError::WorkerFailure {
                        unit: "u".into(),
                        message: "always fails".into(),
                    })
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), "BRAID-025");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_recoverable_error_aborts_immediately() {
        let policy = RetryPolicy::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BraidError::Cancelled { unit: "u".into() })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "BRAID-022");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_preserves_original_error() {
        let policy = RetryPolicy::new(fast_config(0));
        let result: Result<()> = policy
            .execute(|| async {
                Err(BraidError::WorkerFailure {
                    unit: "u".into(),
                    message: "boom".into(),
                })
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "BRAID-020");
    }
}

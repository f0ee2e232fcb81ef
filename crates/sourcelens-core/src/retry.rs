//! Bounded exponential backoff for transient failures

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Configuration for retry logic
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry configuration
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Disable retries entirely (single attempt)
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate the delay preceding a given attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let mut delay = Duration::from_millis(
            (self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32))
                as u64,
        );
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }
}

/// Run `op` until it succeeds, the error is non-retryable, or attempts run out.
///
/// The last error is returned on exhaustion.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<Error> = None;
    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt - 1);
            warn!(operation, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            sleep(delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => last_err = Some(err),
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::graph(format!("{operation}: retries exhausted"))))
}

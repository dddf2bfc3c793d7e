//! Backoff for remote calls (release listing, chart indexes, capability publish).
//!
//! Remote endpoints in this adapter are public HTTP services that rate-limit
//! and flap. Calls are retried a bounded number of times with exponential
//! backoff and jitter; the caller decides what a final failure means.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Backoff settings for a remote call
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one (must be at least 1)
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
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after `attempt` failures, before jitter
    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is reached.
///
/// Returns the last error when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "remote call recovered");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    error = %e,
                    "remote call failed, giving up"
                );
                return Err(e);
            }
            Err(e) => {
                // 0.5x..1.5x jitter
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let delay =
                    Duration::from_secs_f64(config.base_delay(attempt).as_secs_f64() * jitter);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "remote call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

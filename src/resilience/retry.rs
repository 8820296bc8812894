// src/resilience/retry.rs
//! Retry with exponential backoff and optional jitter. Only errors the
//! taxonomy classifies as transient are retried; anything else is returned
//! to the caller on the first occurrence.

use rand::Rng as _;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fast config for tests: tiny delays, no jitter.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }
}

/// `delay = min(base × exponent^attempt, max_delay)`, scaled by ±50% when
/// jitter is enabled.
pub fn compute_delay(attempt: u32, cfg: &RetryConfig) -> Duration {
    let exp = cfg.exponential_base.powi(attempt as i32);
    let mut delay = cfg.base_delay.as_secs_f64() * exp;
    delay = delay.min(cfg.max_delay.as_secs_f64());
    if cfg.jitter {
        delay *= rand::rng().random_range(0.5..1.5);
    }
    Duration::from_secs_f64(delay)
}

/// Run `op` up to `cfg.max_attempts` times. Exhausting attempts returns the
/// final transient error to the caller.
pub async fn retry<T, F, Fut>(label: &str, cfg: &RetryConfig, mut op: F) -> ServiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let attempts = cfg.max_attempts.max(1);
    let mut last_err = ServiceError::transient(label, "no attempts made");

    for attempt in 0..attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                if attempt == attempts - 1 {
                    error!(target: "resilience", %label, attempts, error = %e, "all retry attempts failed");
                    return Err(e);
                }
                let delay = compute_delay(attempt, cfg);
                warn!(
                    target: "resilience",
                    %label,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                last_err = e;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

// src/retry/strategy.rs

use crate::config::ProxyConfig;
use hyper::StatusCode;
use std::time::Duration;

/// Attempt budget and pause between attempts of one forwarded request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    backoff: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration, backoff: bool) -> Self {
        Self {
            max_retries,
            delay,
            backoff,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay(), config.retry_backoff)
    }

    /// The first try plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pause before `attempt` (0-based). Flat, or `delay * 2^(attempt-1)`
    /// with backoff enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        if !self.backoff {
            return self.delay;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        self.delay.saturating_mul(factor)
    }
}

/// Transport errors and 5xx count against a backend, everything else
/// (4xx included) is the backend doing its job.
pub fn is_failure_status(status: StatusCode) -> bool {
    status.as_u16() >= 500
}

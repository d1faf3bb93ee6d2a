//! Retry policy with exponential backoff
//!
//! This module decides whether a failed attempt is retried and after how
//! long. The policy holds no per-call state; the executor tracks attempts.

use crate::config::{ConfigError, RetryConfig};
use crate::error::{Classification, RetryableError};
use rand::Rng;
use std::time::Duration;

/// Retry policy with exponential backoff support
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_total_delay: Option<Duration>,
    max_retry_after: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a RetryPolicy from configuration
    pub fn new(config: &RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_total_delay: config.max_total_delay_ms.map(Duration::from_millis),
            max_retry_after: Duration::from_millis(config.max_retry_after_ms),
            jitter: config.jitter,
        })
    }

    /// Create a RetryPolicy with default configuration
    pub fn with_defaults() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_total_delay: None,
            max_retry_after: Duration::from_millis(config.max_retry_after_ms),
            jitter: config.jitter,
        }
    }

    /// Decide whether attempt number `attempt` (1-based) is followed by another
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// failure is terminal. A server Retry-After hint takes precedence over
    /// the computed backoff for rate-limited attempts; a hint longer than
    /// `max_retry_after` is terminal.
    pub fn should_retry(&self, classification: &Classification, attempt: u32) -> Option<Duration> {
        if !classification.is_retryable() || attempt >= self.max_attempts {
            return None;
        }

        let delay = match classification {
            Classification::RateLimited {
                retry_after: Some(hint),
            } if *hint > self.max_retry_after => return None,
            Classification::RateLimited {
                retry_after: Some(hint),
            } => return Some(*hint),
            _ => self.backoff_delay(attempt),
        };

        if self.jitter {
            // 50-100% of the calculated backoff
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            Some(delay.mul_f64(factor))
        } else {
            Some(delay)
        }
    }

    /// Backoff before the retry that follows attempt `attempt`
    ///
    /// `base * 2^(attempt - 1)`, capped at the maximum delay. Pure.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Whether a cumulative backoff of `total` is still within budget
    pub fn allows_total_delay(&self, total: Duration) -> bool {
        self.max_total_delay.map_or(true, |max| total <= max)
    }

    /// Longest Retry-After hint the policy waits out
    pub fn max_retry_after(&self) -> Duration {
        self.max_retry_after
    }

    /// Maximum number of attempts per call
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

//! Sliding-window rate limiter for outgoing requests
//!
//! This module bounds the number of requests admitted in any trailing window.
//! A request admitted at `T` occupies one slot until `T + window`; there are
//! no bucket boundaries to burst across.

use crate::config::{ConfigError, RateLimitConfig};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Proof that the limiter granted one request slot
///
/// Only [`RateLimiter`] can create an admission, and every transport
/// exchange consumes one.
#[derive(Debug)]
#[must_use = "an admission is a consumed rate-limit slot"]
pub struct Admission {
    admitted_at: Instant,
}

impl Admission {
    /// Instant the slot was granted
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

/// Rate limiter for outgoing requests
///
/// All admission decisions go through a single mutex guarding the window,
/// so two callers can never both take the last free slot. Waiting happens
/// outside the lock.
#[derive(Debug)]
pub struct RateLimiter {
    quota: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a rate limiter from configuration
    ///
    /// A zero quota or window is rejected instead of blocking forever.
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            quota: config.quota as usize,
            window: config.window(),
            admitted: Mutex::new(VecDeque::with_capacity(config.quota as usize)),
        })
    }

    /// Create a rate limiter admitting `quota` requests per `window`
    pub fn with_quota(quota: u32, window: Duration) -> Result<Self, ConfigError> {
        Self::new(&RateLimitConfig {
            quota,
            window_ms: window.as_millis() as u64,
        })
    }

    /// Wait until one more request fits in the window, then record it
    ///
    /// Dropping the returned future before it completes records nothing.
    pub async fn admit(&self) -> Admission {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();
                self.prune(&mut admitted, now);

                if admitted.len() < self.quota {
                    admitted.push_back(now);
                    return Admission { admitted_at: now };
                }

                // Full window: the oldest entry frees its slot first.
                match admitted.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => continue,
                }
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                quota = self.quota,
                "Waiting for rate limit slot"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot if one is free right now
    pub async fn try_admit(&self) -> Option<Admission> {
        let mut admitted = self.admitted.lock().await;
        let now = Instant::now();
        self.prune(&mut admitted, now);

        if admitted.len() < self.quota {
            admitted.push_back(now);
            Some(Admission { admitted_at: now })
        } else {
            None
        }
    }

    /// Number of admissions still inside the trailing window
    pub async fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        self.prune(&mut admitted, Instant::now());
        admitted.len()
    }

    /// Maximum admissions per window
    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

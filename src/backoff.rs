//! Exponential backoff for connection retries
//!
//! Only (re)connecting is retried; transactions are never replayed. Delays
//! double from the initial value up to the cap: 1s, 2s, 4s, ... 30s.

use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;
use crate::constants;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts made by one retry cycle (0 means unlimited)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Add ±25% jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(constants::DEFAULT_RETRY_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(constants::DEFAULT_RETRY_MAX_DELAY_MS),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier.max(1.0),
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let secs = (self.initial_delay.as_secs_f64() * factor).min(max_secs);
        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    #[inline]
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

/// Attempt counter driving a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Advance to the next attempt and return the delay to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.delay_for(self.attempt);

        if self.policy.jitter {
            let millis = delay.as_millis() as f64;
            let range = millis * 0.25;
            if range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-range..range);
                return Duration::from_millis((millis + jitter).max(0.0) as u64);
            }
        }
        delay
    }

    /// Attempts made since the last reset.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub fn exhausted(&self) -> bool {
        !self.policy.allows(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

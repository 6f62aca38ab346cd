//! Retry policy with exponential backoff.
//!
//! A plain value applied at each call site. `delay_for` is pure so the
//! backoff schedule can be checked without sleeping; the resilient client
//! does the actual (tokio) sleeping.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Add up to 10% random jitter on top of each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt + 1` (attempt is zero-based),
    /// without jitter: `min(initial * base^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * exp;
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay actually slept: `delay_for` plus jitter when enabled.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..0.1);
        base + base.mul_f64(factor)
    }
}

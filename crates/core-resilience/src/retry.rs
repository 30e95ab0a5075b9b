//! Retry policy with exponential backoff and jitter
//!
//! `delay(n) = min(max_delay, base_delay * multiplier^(n-1) * (1 + U(0, jitter)))`
//!
//! The deterministic part grows monotonically with the attempt number and is
//! clamped to `max_delay`; jitter spreads clients apart but the final value is
//! clamped again so no delay ever exceeds `max_delay`.

use crate::error::ResilienceError;
use rand::Rng;
use std::time::Duration;

/// Retry configuration shared by every call a client makes
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (> 1)
    pub multiplier: f64,
    /// Random extra fraction added to each delay, in `[0, 1)`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "multiplier must be a finite number > 1, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ResilienceError::InvalidConfig(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(ResilienceError::InvalidConfig(format!(
                "max_delay ({:?}) must not be below base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }

    /// Deterministic component of the delay after attempt `attempt` (1-based)
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        clamp_secs(secs, self.max_delay)
    }

    /// Delay to sleep after attempt `attempt` fails, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        // Also catches NaN from a policy that skipped `validate`
        if !(self.jitter > 0.0) {
            return base;
        }
        let jitter = self.jitter.min(1.0);
        let factor = 1.0 + rand::rng().random_range(0.0..jitter);
        clamp_secs(base.as_secs_f64() * factor, self.max_delay)
    }

    /// Every deterministic delay the policy can produce, in order
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(move |attempt| self.base_delay_for(attempt))
    }
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

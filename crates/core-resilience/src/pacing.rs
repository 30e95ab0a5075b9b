//! Admission pacing: a strict minimum spacing between task starts
//!
//! Wraps a `governor` GCRA limiter with a burst of one, so two admissions are
//! never closer together than `min_interval` regardless of how many tasks are
//! currently running. Useful for honouring request-per-second ceilings imposed
//! by a downstream service.
//!
//! The limiter runs on governor's own monotonic clock, not tokio's, so a
//! paused tokio clock does not advance it.

use crate::context::CallContext;
use crate::error::ResilienceError;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Spaces out admissions by at least `min_interval`
///
/// # Example
/// ```no_run
/// use tether_core_resilience::{RatePacer, ResilienceError};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), ResilienceError> {
/// // At most one start every 100ms
/// let pacer = RatePacer::new(Duration::from_millis(100))?;
///
/// for _ in 0..3 {
///     pacer.wait().await;
///     // start a request...
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RatePacer {
    limiter: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    min_interval: Duration,
}

impl std::fmt::Debug for RatePacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatePacer")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

impl RatePacer {
    /// Create a pacer admitting at most one caller per `min_interval`
    pub fn new(min_interval: Duration) -> Result<Self, ResilienceError> {
        let quota = Quota::with_period(min_interval)
            .ok_or_else(|| {
                ResilienceError::InvalidConfig("min_interval must be > 0".to_string())
            })?
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
            min_interval,
        })
    }

    /// Create a pacer admitting `starts_per_second` callers per second, evenly spaced
    pub fn per_second(starts_per_second: u32) -> Result<Self, ResilienceError> {
        if starts_per_second == 0 {
            return Err(ResilienceError::InvalidConfig(
                "starts_per_second must be > 0".to_string(),
            ));
        }
        Self::new(Duration::from_secs(1) / starts_per_second)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next admission slot
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Wait for the next admission slot unless `ctx` is interrupted first
    ///
    /// An interrupted wait does not consume a slot.
    pub async fn wait_with(&self, ctx: &CallContext) -> Result<(), ResilienceError> {
        if let Some(interrupt) = ctx.check() {
            return Err(interrupt.into());
        }
        tokio::select! {
            biased;
            interrupt = ctx.interrupted() => Err(interrupt.into()),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }

    /// Take an admission slot only if one is available right now
    pub fn try_admit(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_pacer_spaces_admissions() {
        let pacer = RatePacer::new(Duration::from_millis(50)).unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            pacer.wait().await;
        }

        // First admission is immediate, the next two wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_try_admit_is_non_blocking() {
        let pacer = RatePacer::new(Duration::from_secs(10)).unwrap();
        assert!(pacer.try_admit());
        assert!(!pacer.try_admit());
    }

    #[tokio::test]
    async fn test_cancelled_wait_returns_error() {
        let pacer = RatePacer::new(Duration::from_secs(10)).unwrap();
        pacer.wait().await;

        let ctx = CallContext::new();
        ctx.cancel();
        assert_eq!(pacer.wait_with(&ctx).await, Err(ResilienceError::Cancelled));

        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        assert_eq!(
            pacer.wait_with(&ctx).await,
            Err(ResilienceError::DeadlineExceeded)
        );
    }

    #[test]
    fn test_pacer_config() {
        assert!(matches!(
            RatePacer::new(Duration::ZERO),
            Err(ResilienceError::InvalidConfig(_))
        ));
        assert!(RatePacer::per_second(0).is_err());

        let pacer = RatePacer::per_second(4).unwrap();
        assert_eq!(pacer.min_interval(), Duration::from_millis(250));
    }
}

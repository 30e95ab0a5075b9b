//! Call context: cancellation and deadlines for suspending operations
//!
//! Every place the toolkit may park a caller (pool acquire, limiter admission,
//! worker queue submission, retry backoff) accepts a [`CallContext`]. When the
//! context is interrupted the waiting operation gives back whatever it had
//! reserved and returns a distinguishable error.

use crate::error::ResilienceError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a suspended operation was woken early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The cancellation token fired
    Cancelled,
    /// The deadline passed
    DeadlineExceeded,
}

impl From<Interrupt> for ResilienceError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => ResilienceError::Cancelled,
            Interrupt::DeadlineExceeded => ResilienceError::DeadlineExceeded,
        }
    }
}

/// Cancellation signal plus optional deadline carried through a call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never interrupted unless [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// A context with an absolute deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::new().deadline_at(deadline)
    }

    /// A context driven by an existing token (e.g. a service-wide shutdown token)
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Tighten the deadline; an earlier existing deadline is kept
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// A child context: cancelled with the parent, cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Interrupt that has already happened, without waiting
    pub fn check(&self) -> Option<Interrupt> {
        if self.token.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    ///
    /// Pending forever for a default context nobody cancels.
    pub async fn interrupted(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Interrupt::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.check(), None);

        let interrupt = ctx.interrupted().await;
        assert_eq!(interrupt, Interrupt::DeadlineExceeded);
        assert_eq!(ctx.check(), Some(Interrupt::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let ctx = CallContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.interrupted().await });

        ctx.cancel();
        assert_eq!(handle.await.unwrap(), Interrupt::Cancelled);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = CallContext::new();
        let child = parent.child();

        child.cancel();
        assert!(!parent.is_cancelled());

        let other_child = parent.child();
        parent.cancel();
        assert!(other_child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = CallContext::with_deadline(now + Duration::from_secs(1))
            .deadline_at(now + Duration::from_secs(5));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_interrupt_maps_to_error() {
        assert_eq!(
            ResilienceError::from(Interrupt::Cancelled),
            ResilienceError::Cancelled
        );
        assert_eq!(
            ResilienceError::from(Interrupt::DeadlineExceeded),
            ResilienceError::DeadlineExceeded
        );
    }
}

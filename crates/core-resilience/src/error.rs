//! Error types for the resilience primitives

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the primitives themselves (breaker, pool, limiter, workers)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open, no call was attempted
    #[error("Circuit breaker is open, rejecting requests")]
    CircuitOpen,

    /// Connection pool is exhausted
    #[error("Connection pool is exhausted, no available connections")]
    PoolExhausted,

    /// No handle became available before the acquire deadline
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    /// The pool has been closed
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The caller's cancellation token fired while suspended
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's deadline passed while suspended
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The limiter no longer admits work
    #[error("Concurrency limiter is shut down")]
    LimiterShutdown,

    /// A queued task was dropped by a rejecting shutdown
    #[error("Task was rejected before it started")]
    TaskRejected,

    /// A submitted task panicked
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// Connection creation failed
    #[error("Failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_)
                | ResilienceError::ConnectionCreation(_)
                | ResilienceError::PoolExhausted
                | ResilienceError::AcquireTimeout(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_)
                | ResilienceError::CircuitOpen
                | ResilienceError::InvalidConfig(_)
                | ResilienceError::PoolClosed
                | ResilienceError::LimiterShutdown
        )
    }

    /// Check if this error should contribute to circuit breaker failure count
    ///
    /// Local conditions (open breaker, pool pressure, caller interrupts) say
    /// nothing about the health of the downstream dependency.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            ResilienceError::CircuitOpen
                | ResilienceError::PoolExhausted
                | ResilienceError::AcquireTimeout(_)
                | ResilienceError::PoolClosed
                | ResilienceError::Cancelled
                | ResilienceError::DeadlineExceeded
                | ResilienceError::LimiterShutdown
                | ResilienceError::TaskRejected
                | ResilienceError::InvalidConfig(_)
        )
    }
}

/// Outcome of a [`crate::ResilientClient`] call that did not succeed
///
/// `E` is the caller's own error type, returned untouched inside the variant
/// that describes why the client stopped.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker rejected the call, the operation never ran
    #[error("Circuit breaker is open, call not attempted")]
    BreakerOpen,

    /// Every permitted attempt failed with a retryable error
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The operation failed with an error classified as not worth retrying
    #[error("Non-retryable failure on attempt {attempt}: {source}")]
    NonRetryable {
        attempt: u32,
        #[source]
        source: E,
    },

    /// The caller cancelled while the client was waiting
    #[error("Call cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },

    /// The caller's deadline passed while the client was waiting
    #[error("Call deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32, last: Option<E> },

    /// A pooled handle or limiter slot could not be obtained
    #[error("Resource unavailable: {0}")]
    Resource(ResilienceError),
}

impl<E> CallError<E> {
    /// Number of times the operation actually ran
    pub fn attempts(&self) -> u32 {
        match self {
            CallError::BreakerOpen | CallError::Resource(_) => 0,
            CallError::RetryExhausted { attempts, .. }
            | CallError::Cancelled { attempts, .. }
            | CallError::DeadlineExceeded { attempts, .. } => *attempts,
            CallError::NonRetryable { attempt, .. } => *attempt,
        }
    }

    /// The last error produced by the operation, if it ran at all
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::RetryExhausted { last, .. } => Some(last),
            CallError::NonRetryable { source, .. } => Some(source),
            CallError::Cancelled { last, .. } | CallError::DeadlineExceeded { last, .. } => last,
            CallError::BreakerOpen | CallError::Resource(_) => None,
        }
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, CallError::BreakerOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = ResilienceError::Transient("network error".to_string());
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());
        assert!(transient.should_trip_breaker());

        let permanent = ResilienceError::Permanent("auth failed".to_string());
        assert!(!permanent.is_transient());
        assert!(permanent.is_permanent());
        assert!(permanent.should_trip_breaker());

        let circuit_open = ResilienceError::CircuitOpen;
        assert!(!circuit_open.is_transient());
        assert!(circuit_open.is_permanent());
        assert!(!circuit_open.should_trip_breaker());
    }

    #[test]
    fn test_interrupts_do_not_trip_breaker() {
        assert!(!ResilienceError::Cancelled.should_trip_breaker());
        assert!(!ResilienceError::DeadlineExceeded.should_trip_breaker());
        assert!(!ResilienceError::AcquireTimeout(Duration::from_millis(5)).should_trip_breaker());
    }

    #[test]
    fn test_call_error_context() {
        let err: CallError<ResilienceError> = CallError::RetryExhausted {
            attempts: 3,
            last: ResilienceError::Transient("reset".to_string()),
        };
        assert_eq!(err.attempts(), 3);
        assert_eq!(
            err.to_string(),
            "Retries exhausted after 3 attempts: Transient error: reset"
        );
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.into_inner(),
            Some(ResilienceError::Transient("reset".to_string()))
        );

        let open: CallError<ResilienceError> = CallError::BreakerOpen;
        assert!(open.is_breaker_open());
        assert_eq!(open.attempts(), 0);
        assert!(open.into_inner().is_none());
    }
}

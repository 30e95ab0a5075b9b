//! Retryable vs. non-retryable classification of operation failures
//!
//! The toolkit has no opinion on what "retryable" means for a protocol. Callers
//! either implement [`ClassifyFailure`] for their error type or hand a closure
//! to [`crate::ResilientClient::execute_classified`].

use crate::error::ResilienceError;
use std::io;

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt (timeouts, resets, 5xx-class responses)
    Retryable,
    /// Retrying cannot help (4xx-class responses, malformed input)
    NonRetryable,
}

/// Error types that know whether they are worth retrying
pub trait ClassifyFailure {
    fn failure_kind(&self) -> FailureKind;
}

impl ClassifyFailure for ResilienceError {
    fn failure_kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::Retryable
        } else {
            FailureKind::NonRetryable
        }
    }
}

impl ClassifyFailure for io::Error {
    fn failure_kind(&self) -> FailureKind {
        use io::ErrorKind::*;
        if matches!(
            self.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        ) {
            FailureKind::Retryable
        } else {
            FailureKind::NonRetryable
        }
    }
}

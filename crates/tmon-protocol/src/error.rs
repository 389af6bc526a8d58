//! Protocol-level parse errors.

use thiserror::Error;

/// Errors raised while interpreting a field of a remote response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Duration string not in Go `time.Duration` notation
    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    /// Negative duration where only elapsed time makes sense
    #[error("Negative duration: {0}")]
    NegativeDuration(String),
}

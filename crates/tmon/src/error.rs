//! Error types for the tmon client.
//!
//! Errors fall into the taxonomy the rest of the client relies on:
//! transient transport failures are retried by the next poll or a user
//! refresh, everything else becomes a one-shot notification.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tmon_core::TaskId;
use tmon_protocol::ProtocolError;

// ============================================================================
// Client Error Type
// ============================================================================

/// Client-side errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The configured API base is not a usable URL.
    #[error("Invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// The orchestrator did not answer within the transport timeout.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Connection refused, reset, DNS failure and friends.
    #[error("HTTP transport error: {0}")]
    Http(#[source] reqwest::Error),

    /// The orchestrator does not know the task.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Any other non-2xx answer.
    #[error("Orchestrator returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A field inside an otherwise valid response could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An operation needed a selected session and none is known yet.
    #[error("No session selected")]
    NoSession,

    /// I/O error passthrough (persistence, log files).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Maps a transport error, separating timeouts from the rest.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Http(err)
        }
    }

    /// True for failures that the next poll or a manual refresh may clear.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let error = ClientError::Timeout(Duration::from_secs(5));
        assert_eq!(error.to_string(), "Request timed out after 5000ms");
    }

    #[test]
    fn test_task_not_found_display() {
        let error = ClientError::TaskNotFound(TaskId::new(42));
        assert_eq!(error.to_string(), "Task not found: 42");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(ClientError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!ClientError::Status {
            status: 400,
            body: "bad".to_string()
        }
        .is_transient());
        assert!(!ClientError::TaskNotFound(TaskId::new(1)).is_transient());
        assert!(!ClientError::NoSession.is_transient());
    }

    #[test]
    fn test_decode_error_from_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{ invalid").unwrap_err();
        let error: ClientError = json_error.into();
        assert!(matches!(error, ClientError::Decode(_)));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_protocol_error_from_conversion() {
        let error: ClientError = ProtocolError::InvalidDuration("x".to_string()).into();
        assert!(error.to_string().contains("Invalid duration format"));
    }
}

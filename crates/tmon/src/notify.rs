//! User-facing notifications.
//!
//! Component failures never terminate the process; they surface here as
//! one-shot messages while the component keeps its last good state.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "ok"),
            Self::Warning => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Level::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    /// Builds a notification for a failed operation. Transient failures are
    /// warnings since the next poll may clear them.
    pub fn from_error(context: &str, err: &ClientError) -> Self {
        let level = if err.is_transient() {
            Level::Warning
        } else {
            Level::Error
        };
        Self::new(level, format!("{context}: {err}"))
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.at.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Sending half of the notification channel.
pub type NotificationSender = mpsc::UnboundedSender<Notification>;

/// Sends a notification; a closed channel means the UI is shutting down.
pub fn notify(tx: &NotificationSender, notification: Notification) {
    if tx.send(notification).is_err() {
        debug!("Notification channel closed, dropping message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_transient_error_is_warning() {
        let n = Notification::from_error("Refresh failed", &ClientError::Timeout(Duration::from_secs(5)));
        assert_eq!(n.level, Level::Warning);
        assert_eq!(n.message, "Refresh failed: Request timed out after 5000ms");
    }

    #[test]
    fn test_from_permanent_error_is_error() {
        let n = Notification::from_error("Stop failed", &ClientError::NoSession);
        assert_eq!(n.level, Level::Error);
    }

    #[test]
    fn test_notify_on_closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        notify(&tx, Notification::info("hello"));
    }
}

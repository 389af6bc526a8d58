//! Session entities: one run lifetime of the monitored process.

use crate::TaskDuration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a session, e.g. "session-1705312800123456789".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a shortened display form (last 8 characters).
    ///
    /// Session ids share a long common prefix, so the tail is the part that
    /// tells them apart.
    #[must_use]
    pub fn short(&self) -> &str {
        let len = self.0.len();
        self.0.get(len.saturating_sub(8)..).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One lifetime of the monitored process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(alias = "sessionId")]
    pub id: SessionId,
    pub start_time: DateTime<Utc>,
    /// Absent while the process is alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pid: u32,
    /// Invocation string of the monitored process.
    #[serde(default)]
    pub args: String,
}

impl SessionRecord {
    /// The session with no end time is the live one.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.end_time.is_none()
    }

    /// Lifetime of the session; open sessions are measured up to `now`.
    pub fn uptime_at(&self, now: DateTime<Utc>) -> TaskDuration {
        TaskDuration::between(self.start_time, self.end_time.unwrap_or(now))
    }
}

//! Elapsed-time value object shared by live tasks and history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative span of time in milliseconds.
///
/// Live tasks derive it from `now - start_time` at render time; history
/// records carry a frozen value computed by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDuration(u64);

impl TaskDuration {
    pub const ZERO: Self = Self(0);

    /// Creates a duration from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Duration between two instants, clamped to zero when `end < start`.
    ///
    /// Clock skew between the remote authority and this host can place a
    /// start time slightly in the future.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let ms = end.signed_duration_since(start).num_milliseconds();
        Self(u64::try_from(ms).unwrap_or(0))
    }

    /// Returns the duration in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns the duration in whole seconds.
    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Sum that saturates instead of overflowing.
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Formats for display.
    ///
    /// Returns the two most significant units: "3d 4h", "2h 5m", "1m 30s", "42s".
    pub fn format(&self) -> String {
        let seconds = self.as_secs();
        let minutes = seconds / 60;
        let hours = minutes / 60;
        let days = hours / 24;

        if days > 0 {
            format!("{days}d {}h", hours % 24)
        } else if hours > 0 {
            format!("{hours}h {}m", minutes % 60)
        } else if minutes > 0 {
            format!("{minutes}m {}s", seconds % 60)
        } else {
            format!("{seconds}s")
        }
    }
}

impl fmt::Display for TaskDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl From<std::time::Duration> for TaskDuration {
    fn from(d: std::time::Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_seconds() {
        assert_eq!(TaskDuration::from_millis(0).format(), "0s");
        assert_eq!(TaskDuration::from_millis(42_999).format(), "42s");
    }

    #[test]
    fn test_format_minutes_hours_days() {
        assert_eq!(TaskDuration::from_millis(90_000).format(), "1m 30s");
        assert_eq!(TaskDuration::from_millis(3_900_000).format(), "1h 5m");
        assert_eq!(
            TaskDuration::from_millis((3 * 24 + 4) * 3_600_000).format(),
            "3d 4h"
        );
    }

    #[test]
    fn test_between_clamps_negative() {
        let now = Utc::now();
        let future = now + Duration::seconds(5);
        assert_eq!(TaskDuration::between(future, now), TaskDuration::ZERO);
        assert_eq!(
            TaskDuration::between(now, future).as_millis(),
            5_000
        );
    }
}

//! Parsing of loosely-typed fields in remote responses.
//!
//! The history aggregate endpoint renders durations with Go's
//! `time.Duration.String()` (`"1h2m3.5s"`, `"850ms"`, `"0s"`), while record
//! durations are plain milliseconds. Both end up as [`TaskDuration`].

use crate::ProtocolError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tmon_core::{HistoryStats, SessionId, TaskDuration};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Parses a Go duration string into milliseconds.
///
/// Accepts an optional sign, then one or more `<number><unit>` pairs where
/// the number may carry a fraction and the unit is one of `ns`, `us`, `µs`,
/// `μs`, `ms`, `s`, `m`, `h`. The bare string `"0"` is zero. Sub-millisecond
/// remainders are truncated.
pub fn parse_go_duration(input: &str) -> Result<TaskDuration, ProtocolError> {
    let invalid = || ProtocolError::InvalidDuration(input.to_string());

    let trimmed = input.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if body == "0" {
        return Ok(TaskDuration::ZERO);
    }
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos = 0.0_f64;
    let mut rest = body;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale = unit_nanos(unit).ok_or_else(invalid)?;

        total_nanos += value * scale;
        rest = next;
    }

    if negative && total_nanos > 0.0 {
        return Err(ProtocolError::NegativeDuration(input.to_string()));
    }

    // Float-to-int `as` saturates, so absurd inputs clamp instead of wrapping.
    Ok(TaskDuration::from_millis((total_nanos / NANOS_PER_MILLI) as u64))
}

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "µs" | "μs" => Some(1_000.0),
        "ms" => Some(1_000_000.0),
        "s" => Some(1_000_000_000.0),
        "m" => Some(60.0 * 1_000_000_000.0),
        "h" => Some(3_600.0 * 1_000_000_000.0),
        _ => None,
    }
}

/// Duration as it may appear on the wire: milliseconds or Go notation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Millis(u64),
    Text(String),
}

impl Default for RawDuration {
    fn default() -> Self {
        Self::Millis(0)
    }
}

impl RawDuration {
    pub fn to_duration(&self) -> Result<TaskDuration, ProtocolError> {
        match self {
            Self::Millis(ms) => Ok(TaskDuration::from_millis(*ms)),
            Self::Text(text) => parse_go_duration(text),
        }
    }
}

/// Raw `GET /tasks/history/stats` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHistoryStats {
    #[serde(default)]
    pub session_id: SessionId,
    #[serde(default)]
    pub session_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_tasks: u64,
    #[serde(default)]
    pub total_duration: RawDuration,
    #[serde(default)]
    pub average_duration: RawDuration,
    #[serde(default)]
    pub owner_type_stats: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub task_type_stats: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub state_stats: Option<BTreeMap<String, u64>>,
}

impl RawHistoryStats {
    pub fn into_stats(self) -> Result<HistoryStats, ProtocolError> {
        Ok(HistoryStats {
            total_duration: self.total_duration.to_duration()?,
            average_duration: self.average_duration.to_duration()?,
            session_id: self.session_id,
            total_tasks: self.total_tasks,
            owner_type_stats: self.owner_type_stats.unwrap_or_default(),
            task_type_stats: self.task_type_stats.unwrap_or_default(),
            state_stats: self.state_stats.unwrap_or_default(),
        })
    }
}

//! Completed-task history: records, filters and aggregates.
//!
//! History is append-only and owned by the remote authority. Every record is
//! scoped permanently to the session it ran in and identified by
//! `(session_id, id)`.

use crate::task::{deserialize_non_empty, deserialize_parent_id};
use crate::{RetryBudget, SessionId, TaskDuration, TaskId, TaskState, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// History Record
// ============================================================================

/// Frozen snapshot of a task taken when it reached its terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(alias = "taskId")]
    pub id: TaskId,
    #[serde(default)]
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(alias = "owner", default)]
    pub owner_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `end_time - start_time` in milliseconds, as stored remotely.
    #[serde(default)]
    pub duration: TaskDuration,
    pub state: TaskState,
    #[serde(
        default,
        deserialize_with = "deserialize_non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retry: i32,
    #[serde(
        default,
        deserialize_with = "deserialize_parent_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub level: u32,
    #[serde(default, deserialize_with = "deserialize_descriptions")]
    pub descriptions: BTreeMap<String, String>,
}

impl HistoryRecord {
    /// Identity of the record across sessions.
    pub fn key(&self) -> (SessionId, TaskId) {
        (self.session_id.clone(), self.id)
    }

    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.retry_count, self.max_retry)
    }
}

/// Descriptions arrive either as a JSON object or, from the database-backed
/// dashboard, as a string holding a JSON object.
fn deserialize_descriptions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDescriptions {
        Map(BTreeMap<String, String>),
        Encoded(String),
    }

    Ok(match Option::<RawDescriptions>::deserialize(deserializer)? {
        Some(RawDescriptions::Map(map)) => map,
        Some(RawDescriptions::Encoded(text)) if text.trim().is_empty() => BTreeMap::new(),
        Some(RawDescriptions::Encoded(text)) => {
            serde_json::from_str(&text).map_err(serde::de::Error::custom)?
        }
        None => BTreeMap::new(),
    })
}

// ============================================================================
// Filter
// ============================================================================

/// Conjunctive predicate over history records, plus pagination.
///
/// Absent fields impose no constraint. Time bounds are half-open and apply
/// to the record's start time: `start_time <= record.start_time < end_time`.
///
/// Serializes to the query-string form the remote expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn owner_type(mut self, owner_type: impl Into<String>) -> Self {
        self.owner_type = Some(owner_type.into());
        self
    }

    #[must_use]
    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    #[must_use]
    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Restricts to records started in `[start, end)`.
    #[must_use]
    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    #[must_use]
    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Same predicate, pagination removed.
    #[must_use]
    pub fn without_page(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }

    /// True when no predicate field is set (pagination aside).
    pub fn is_unconstrained(&self) -> bool {
        self.owner_type.is_none()
            && self.task_type.is_none()
            && self.session_id.is_none()
            && self.parent_id.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    /// Evaluates the predicate fields against one record.
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        self.owner_type
            .as_ref()
            .is_none_or(|owner| *owner == record.owner_type)
            && self.task_type.is_none_or(|t| t == record.task_type)
            && self
                .session_id
                .as_ref()
                .is_none_or(|session| *session == record.session_id)
            && self.parent_id.is_none_or(|p| Some(p) == record.parent_id)
            && self.start_time.is_none_or(|start| record.start_time >= start)
            && self.end_time.is_none_or(|end| record.start_time < end)
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// A page shorter than the requested limit is the last one, whatever the
/// reported total says. Without a limit the first page is everything.
pub fn is_last_page(returned: usize, limit: Option<u32>) -> bool {
    match limit {
        Some(limit) if limit > 0 => returned < limit as usize,
        _ => true,
    }
}

/// Number of pages needed to show `total` records, at least one.
pub fn page_count(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 1;
    }
    total.div_ceil(u64::from(page_size)).max(1)
}

// ============================================================================
// Aggregates
// ============================================================================

/// Aggregate statistics over one session's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub session_id: SessionId,
    pub total_tasks: u64,
    pub total_duration: TaskDuration,
    pub average_duration: TaskDuration,
    #[serde(default)]
    pub owner_type_stats: BTreeMap<String, u64>,
    #[serde(default)]
    pub task_type_stats: BTreeMap<String, u64>,
    #[serde(default)]
    pub state_stats: BTreeMap<String, u64>,
}

impl HistoryStats {
    /// Aggregates `records` that belong to `session_id`; records of other
    /// sessions are ignored.
    pub fn aggregate<'a>(
        session_id: SessionId,
        records: impl IntoIterator<Item = &'a HistoryRecord>,
    ) -> Self {
        let mut stats = Self {
            session_id,
            ..Self::default()
        };

        for record in records {
            if record.session_id != stats.session_id {
                continue;
            }
            stats.total_tasks += 1;
            stats.total_duration = stats.total_duration.saturating_add(record.duration);
            *stats
                .owner_type_stats
                .entry(record.owner_type.clone())
                .or_insert(0) += 1;
            *stats
                .task_type_stats
                .entry(record.task_type.to_string())
                .or_insert(0) += 1;
            *stats.state_stats.entry(record.state.to_string()).or_insert(0) += 1;
        }

        if stats.total_tasks > 0 {
            stats.average_duration =
                TaskDuration::from_millis(stats.total_duration.as_millis() / stats.total_tasks);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_312_800 + secs, 0).single().unwrap()
    }

    fn record(id: u32, session: &str, owner: &str, start: i64, duration_ms: u64) -> HistoryRecord {
        HistoryRecord {
            id: TaskId::new(id),
            session_id: SessionId::new(session),
            task_type: TaskType::Task,
            owner_type: owner.to_string(),
            start_time: at(start),
            end_time: at(start) + chrono::Duration::milliseconds(duration_ms as i64),
            duration: TaskDuration::from_millis(duration_ms),
            state: TaskState::Disposed,
            stop_reason: Some("task complete".to_string()),
            retry_count: 0,
            max_retry: 0,
            parent_id: None,
            level: 1,
            descriptions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = HistoryFilter::new();
        assert!(filter.is_unconstrained());
        assert!(filter.matches(&record(1, "s1", "DemoTask", 0, 10)));
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let filter = HistoryFilter::new()
            .owner_type("DemoTask")
            .session(SessionId::new("s1"));

        assert!(filter.matches(&record(1, "s1", "DemoTask", 0, 10)));
        assert!(!filter.matches(&record(2, "s2", "DemoTask", 0, 10)));
        assert!(!filter.matches(&record(3, "s1", "LongRunningTask", 0, 10)));
    }

    #[test]
    fn test_time_bounds_are_half_open() {
        let filter = HistoryFilter::new().between(Some(at(10)), Some(at(20)));

        assert!(!filter.matches(&record(1, "s", "o", 9, 1)));
        assert!(filter.matches(&record(2, "s", "o", 10, 1)));
        assert!(filter.matches(&record(3, "s", "o", 19, 1)));
        assert!(!filter.matches(&record(4, "s", "o", 20, 1)));
    }

    #[test]
    fn test_parent_filter() {
        let mut child = record(5, "s", "o", 0, 1);
        child.parent_id = Some(TaskId::new(2));
        let filter = HistoryFilter::new().parent(TaskId::new(2));
        assert!(filter.matches(&child));
        assert!(!filter.matches(&record(6, "s", "o", 0, 1)));
    }

    #[test]
    fn test_filter_query_serialization_skips_absent_fields() {
        let filter = HistoryFilter::new()
            .owner_type("DemoTask")
            .task_type(TaskType::Job)
            .page(20, 40);
        let json = serde_json::to_value(&filter).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"ownerType": "DemoTask", "taskType": 1, "limit": 20, "offset": 40})
        );
    }

    #[test]
    fn test_is_last_page() {
        assert!(is_last_page(3, Some(10)));
        assert!(!is_last_page(10, Some(10)));
        assert!(is_last_page(0, Some(10)));
        assert!(is_last_page(500, None));
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 20), 1);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
        assert_eq!(page_count(5, 0), 1);
    }

    #[test]
    fn test_aggregate_scopes_to_session() {
        let records = vec![
            record(1, "s1", "DemoTask", 0, 1_000),
            record(2, "s1", "DemoTask", 5, 3_000),
            record(3, "s1", "LongRunningTask", 9, 2_000),
            record(1, "s0", "DemoTask", 0, 60_000),
        ];

        let stats = HistoryStats::aggregate(SessionId::new("s1"), &records);
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.total_duration.as_millis(), 6_000);
        assert_eq!(stats.average_duration.as_millis(), 2_000);
        assert_eq!(stats.owner_type_stats.get("DemoTask"), Some(&2));
        assert_eq!(stats.state_stats.get("DISPOSED"), Some(&3));
    }

    #[test]
    fn test_aggregate_empty_session() {
        let stats = HistoryStats::aggregate(SessionId::new("none"), &[]);
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.average_duration, TaskDuration::ZERO);
    }

    #[test]
    fn test_record_parses_encoded_descriptions() {
        let json = r#"{
            "taskId": 12,
            "sessionId": "s1",
            "type": 0,
            "ownerType": "DemoTask",
            "startTime": "2024-01-15T10:00:00Z",
            "endTime": "2024-01-15T10:00:02Z",
            "duration": 2000,
            "state": 6,
            "stopReason": "",
            "retryCount": 0,
            "descriptions": "{\"name\":\"demo-task-1\"}",
            "maxRetry": 0,
            "parentId": null,
            "level": 1
        }"#;

        let record: HistoryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, TaskId::new(12));
        assert_eq!(record.stop_reason, None);
        assert_eq!(record.duration.format(), "2s");
        assert_eq!(
            record.descriptions.get("name").map(String::as_str),
            Some("demo-task-1")
        );
        assert_eq!(record.key(), (SessionId::new("s1"), TaskId::new(12)));
    }
}

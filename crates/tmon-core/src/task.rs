//! Task entities and value objects.

use crate::{DomainError, TaskDuration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier assigned to a task by the remote authority.
///
/// Monotonically assigned and immutable; the only stable identity a task has,
/// so it doubles as the sort key for sibling ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for TaskId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ============================================================================
// Type and State Codes
// ============================================================================

/// Code recorded for enum values that arrive as an unrecognized name.
pub const UNRECOGNIZED_CODE: i64 = -1;

/// Wire representation of an enum code: the remote sends integers, older
/// builds of the dashboard sent upper-case names.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCode {
    Code(i64),
    Name(String),
}

/// Kind of construct that owns a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Task,
    Job,
    Work,
    Channel,
    /// A code this client does not know about yet.
    Unknown(i64),
}

impl TaskType {
    /// All known types, in code order.
    pub const KNOWN: [TaskType; 4] = [Self::Task, Self::Job, Self::Work, Self::Channel];

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Task,
            1 => Self::Job,
            2 => Self::Work,
            3 => Self::Channel,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Task => 0,
            Self::Job => 1,
            Self::Work => 2,
            Self::Channel => 3,
            Self::Unknown(code) => *code,
        }
    }

    /// Parses the upper-case wire name; unrecognized names become `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "TASK" => Self::Task,
            "JOB" => Self::Job,
            "WORK" => Self::Work,
            "CHANNEL" => Self::Channel,
            _ => Self::Unknown(UNRECOGNIZED_CODE),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Strict parse for user input: unrecognized names are rejected.
impl FromStr for TaskType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let task_type = Self::from_name(s.trim());
        if task_type.is_known() {
            Ok(task_type)
        } else {
            Err(DomainError::InvalidFieldValue {
                field: "task type".to_string(),
                value: s.to_string(),
                expected: "TASK, JOB, WORK or CHANNEL".to_string(),
            })
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "TASK"),
            Self::Job => write!(f, "JOB"),
            Self::Work => write!(f, "WORK"),
            Self::Channel => write!(f, "CHANNEL"),
            Self::Unknown(code) => write!(f, "unknown type {code}"),
        }
    }
}

impl Serialize for TaskType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawCode::deserialize(deserializer)? {
            RawCode::Code(code) => Self::from_code(code),
            RawCode::Name(name) => Self::from_name(&name),
        })
    }
}

/// Lifecycle state of a task.
///
/// Transitions are strictly forward and driven by the remote authority:
/// `Init -> Starting -> Started -> Running -> Going -> Disposing -> Disposed`.
/// This client only observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Init,
    Starting,
    Started,
    Running,
    Going,
    Disposing,
    /// Terminal.
    Disposed,
    /// A code outside `0..=6`.
    Unknown(i64),
}

impl TaskState {
    /// All known states, in lifecycle order.
    pub const KNOWN: [TaskState; 7] = [
        Self::Init,
        Self::Starting,
        Self::Started,
        Self::Running,
        Self::Going,
        Self::Disposing,
        Self::Disposed,
    ];

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Running,
            4 => Self::Going,
            5 => Self::Disposing,
            6 => Self::Disposed,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Init => 0,
            Self::Starting => 1,
            Self::Started => 2,
            Self::Running => 3,
            Self::Going => 4,
            Self::Disposing => 5,
            Self::Disposed => 6,
            Self::Unknown(code) => *code,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "INIT" => Self::Init,
            "STARTING" => Self::Starting,
            "STARTED" => Self::Started,
            "RUNNING" => Self::Running,
            "GOING" => Self::Going,
            "DISPOSING" => Self::Disposing,
            "DISPOSED" => Self::Disposed,
            _ => Self::Unknown(UNRECOGNIZED_CODE),
        }
    }

    /// Returns true once no further transitions can occur.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Returns true while the task is doing work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Going)
    }

    /// Returns true if a stop request makes sense from the operator's side.
    ///
    /// The remote authority remains the judge; this only drives UI affordances.
    #[must_use]
    pub fn is_stoppable(&self) -> bool {
        !matches!(self, Self::Disposing | Self::Disposed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Starting => write!(f, "STARTING"),
            Self::Started => write!(f, "STARTED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Going => write!(f, "GOING"),
            Self::Disposing => write!(f, "DISPOSING"),
            Self::Disposed => write!(f, "DISPOSED"),
            Self::Unknown(code) => write!(f, "unknown state {code}"),
        }
    }
}

impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawCode::deserialize(deserializer)? {
            RawCode::Code(code) => Self::from_code(code),
            RawCode::Name(name) => Self::from_name(&name),
        })
    }
}

// ============================================================================
// Retry Budget
// ============================================================================

/// Upper bound on retries; the wire encodes unlimited as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxRetry {
    Unlimited,
    Limited(u32),
}

impl MaxRetry {
    pub fn from_raw(raw: i32) -> Self {
        u32::try_from(raw).map_or(Self::Unlimited, Self::Limited)
    }
}

impl fmt::Display for MaxRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "∞"),
            Self::Limited(max) => write!(f, "{max}"),
        }
    }
}

/// Retries consumed against the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub used: u32,
    pub max: MaxRetry,
}

impl RetryBudget {
    pub fn new(used: u32, max_raw: i32) -> Self {
        Self {
            used,
            max: MaxRetry::from_raw(max_raw),
        }
    }

    /// An unlimited budget is never exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        match self.max {
            MaxRetry::Unlimited => false,
            MaxRetry::Limited(max) => self.used >= max,
        }
    }
}

impl fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.used, self.max)
    }
}

// ============================================================================
// Task Record
// ============================================================================

/// One node of the live task hierarchy as reported by the remote authority.
///
/// `level` and `parent_id` come from the snapshot and are not trusted for
/// display; [`crate::TaskTree`] recomputes both during flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(alias = "ownerType", default)]
    pub owner: String,
    pub state: TaskState,
    #[serde(default)]
    pub level: u32,
    #[serde(
        default,
        deserialize_with = "deserialize_parent_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<TaskId>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub children: Vec<TaskRecord>,
    pub start_time: DateTime<Utc>,
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
    #[serde(default)]
    pub start_reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: BTreeMap<String, String>,
    /// Child the owning job is currently blocked on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<Box<TaskRecord>>,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub pointer: u64,
    #[serde(default)]
    pub event_loop_running: bool,
}

impl TaskRecord {
    /// Creates a record with empty annotations, mainly for tests and fakes.
    pub fn new(id: u32, task_type: TaskType, owner: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: TaskId::new(id),
            task_type,
            owner: owner.into(),
            state,
            level: 0,
            parent_id: None,
            children: Vec::new(),
            start_time: Utc::now(),
            stop_reason: None,
            retry_count: 0,
            max_retry: 0,
            start_reason: String::new(),
            description: BTreeMap::new(),
            blocked: None,
            blocking: false,
            pointer: 0,
            event_loop_running: false,
        }
    }

    /// Builder-style helper to attach children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<TaskRecord>) -> Self {
        self.children = children;
        self
    }

    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.retry_count, self.max_retry)
    }

    /// Time spent since the task started, evaluated at `now`.
    ///
    /// Live views call this on every refresh tick with the current clock,
    /// not with the snapshot's fetch time.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> TaskDuration {
        TaskDuration::between(self.start_time, now)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Total number of records in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(TaskRecord::subtree_len).sum::<usize>()
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// The remote encodes "no parent" as `0` or as an omitted key.
pub(crate) fn deserialize_parent_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TaskId>, D::Error> {
    let raw = Option::<u32>::deserialize(deserializer)?;
    Ok(raw.filter(|id| *id != 0).map(TaskId::new))
}

/// Treats `null` like a missing value for collections.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Maps `""` and `null` to `None`.
pub(crate) fn deserialize_non_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_honours_width() {
        assert_eq!(format!("{:>5}", TaskId::new(42)), "   42");
        assert_eq!(format!("{:<4}|", TaskId::new(7)), "7   |");
    }

    #[test]
    fn test_state_from_code_and_name_agree() {
        for state in TaskState::KNOWN {
            assert_eq!(TaskState::from_code(state.code()), state);
            assert_eq!(TaskState::from_name(&state.to_string()), state);
        }
    }

    #[test]
    fn test_unknown_state_renders_label() {
        let state: TaskState = serde_json::from_str("9").unwrap();
        assert_eq!(state, TaskState::Unknown(9));
        assert_eq!(state.to_string(), "unknown state 9");
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_unknown_type_from_name() {
        let task_type: TaskType = serde_json::from_str("\"STREAM\"").unwrap();
        assert_eq!(task_type, TaskType::Unknown(UNRECOGNIZED_CODE));
        assert!(!task_type.is_known());
    }

    #[test]
    fn test_type_accepts_name_and_code() {
        let by_name: TaskType = serde_json::from_str("\"JOB\"").unwrap();
        let by_code: TaskType = serde_json::from_str("1").unwrap();
        assert_eq!(by_name, TaskType::Job);
        assert_eq!(by_code, TaskType::Job);
        assert_eq!(serde_json::to_string(&by_name).unwrap(), "1");
    }

    #[test]
    fn test_retry_budget_unlimited() {
        let budget = RetryBudget::new(4, -1);
        assert_eq!(budget.to_string(), "4 / ∞");
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_retry_budget_limited() {
        let budget = RetryBudget::new(3, 3);
        assert_eq!(budget.to_string(), "3 / 3");
        assert!(budget.is_exhausted());
        assert!(!RetryBudget::new(1, 3).is_exhausted());
    }

    #[test]
    fn test_record_parsing_from_wire() {
        let json = r#"{
            "id": 7,
            "type": 1,
            "owner": "LongRunningTask",
            "startTime": "2024-01-15T10:00:00.123456789+08:00",
            "description": null,
            "state": 3,
            "pointer": 824634335232,
            "parentId": 0,
            "eventLoopRunning": true,
            "level": 1,
            "startReason": "created by root",
            "retryCount": 2,
            "maxRetry": -1
        }"#;

        let record: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, TaskId::new(7));
        assert_eq!(record.task_type, TaskType::Job);
        assert_eq!(record.state, TaskState::Running);
        assert_eq!(record.parent_id, None);
        assert!(record.description.is_empty());
        assert!(record.children.is_empty());
        assert_eq!(record.stop_reason, None);
        assert_eq!(record.retry_budget().to_string(), "2 / ∞");
    }

    #[test]
    fn test_record_parses_owner_type_alias_and_stop_reason() {
        let json = r#"{
            "id": 3,
            "type": "TASK",
            "ownerType": "DemoTask",
            "startTime": "2024-01-15T10:00:00Z",
            "state": "DISPOSED",
            "parentId": 1,
            "stopReason": "task complete",
            "description": {"name": "demo-task-1"}
        }"#;

        let record: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.owner, "DemoTask");
        assert_eq!(record.parent_id, Some(TaskId::new(1)));
        assert_eq!(record.stop_reason.as_deref(), Some("task complete"));
        assert!(record.is_terminal());
        assert_eq!(record.description.get("name").map(String::as_str), Some("demo-task-1"));
    }

    #[test]
    fn test_subtree_len() {
        let root = TaskRecord::new(1, TaskType::Job, "root", TaskState::Running).with_children(vec![
            TaskRecord::new(2, TaskType::Task, "a", TaskState::Running),
            TaskRecord::new(3, TaskType::Job, "b", TaskState::Running).with_children(vec![
                TaskRecord::new(4, TaskType::Task, "c", TaskState::Init),
            ]),
        ]);
        assert_eq!(root.subtree_len(), 4);
    }

    #[test]
    fn test_task_type_from_str_is_strict() {
        assert_eq!("job".parse::<TaskType>(), Ok(TaskType::Job));
        assert_eq!(" CHANNEL ".parse::<TaskType>(), Ok(TaskType::Channel));
        let err = "jobs".parse::<TaskType>().unwrap_err();
        assert!(err.to_string().contains("Invalid task type: jobs"));
    }
}

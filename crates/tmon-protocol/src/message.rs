//! Endpoints and response envelopes of the remote authority.

use serde::{Deserialize, Deserializer, Serialize};
use tmon_core::{HistoryRecord, TaskId, TaskRecord};

/// HTTP verbs used by the remote surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Operations exposed by the remote authority.
///
/// Paths are relative to the API base (e.g. `http://localhost:8082/api`).
/// History filters travel as query parameters added by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Current hierarchy snapshot
    TaskTree,
    /// Flat list of live tasks
    ListTasks,
    /// One live task
    GetTask(TaskId),
    /// Request termination of a task
    StopTask(TaskId),
    /// Ask the orchestrator to spawn a demonstration task
    CreateDemoTask,
    /// Filtered, paginated history
    History,
    /// Aggregate over the current session's history
    HistoryStats,
    /// Current session
    Session,
    /// Outcome counts over live tasks
    TaskStats,
}

impl Endpoint {
    pub fn method(&self) -> HttpMethod {
        match self {
            Self::StopTask(_) | Self::CreateDemoTask => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }

    /// Path relative to the API base, without a leading slash so that it
    /// joins onto a base URL ending in `/`.
    pub fn path(&self) -> String {
        match self {
            Self::TaskTree => "tasks/tree".to_string(),
            Self::ListTasks | Self::CreateDemoTask => "tasks".to_string(),
            Self::GetTask(id) => format!("tasks/{id}"),
            Self::StopTask(id) => format!("tasks/{id}/stop"),
            Self::History => "tasks/history".to_string(),
            Self::HistoryStats => "tasks/history/stats".to_string(),
            Self::Session => "session".to_string(),
            Self::TaskStats => "tasks/stats".to_string(),
        }
    }
}

/// Body of a stop request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StopRequest {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }
}

/// `GET /tasks/tree` response.
///
/// Some orchestrator builds wrap the root as `{"root": ...}`, others return
/// the root record directly; `{"root": null}` means no tasks at all.
///
/// The wrapped form requires the `root` key, so an object that is neither a
/// task record nor a wrapper fails to decode instead of reading as empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TreeResponse {
    Bare(Box<TaskRecord>),
    Wrapped {
        #[serde(deserialize_with = "required_root")]
        root: Option<Box<TaskRecord>>,
    },
}

/// Present-but-null is allowed; a missing key is an error.
fn required_root<'de, D>(deserializer: D) -> Result<Option<Box<TaskRecord>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::deserialize(deserializer)
}

impl TreeResponse {
    pub fn into_root(self) -> Option<TaskRecord> {
        match self {
            Self::Bare(root) => Some(*root),
            Self::Wrapped { root } => root.map(|r| *r),
        }
    }
}

/// `GET /tasks/history` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPageResponse {
    #[serde(default)]
    pub tasks: Option<Vec<HistoryRecord>>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_pages: u32,
}

impl HistoryPageResponse {
    /// Records on this page; a `null` list is an empty page.
    pub fn records(&self) -> &[HistoryRecord] {
        self.tasks.as_deref().unwrap_or(&[])
    }
}

/// `GET /tasks/stats` response: outcome counts over live tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub retry_count: u64,
}

//! tmon Core - Domain types for task-orchestrator monitoring
//!
//! This crate provides the read-only replica model shared by the protocol
//! and client crates: the task hierarchy and its flattening, sessions, and
//! the completed-task history with its filter and aggregates.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod duration;
pub mod error;
pub mod history;
pub mod session;
pub mod task;
pub mod tree;

// Re-exports for convenience
pub use duration::TaskDuration;
pub use error::{DomainError, DomainResult};
pub use history::{is_last_page, page_count, HistoryFilter, HistoryRecord, HistoryStats};
pub use session::{SessionId, SessionRecord};
pub use task::{MaxRetry, RetryBudget, TaskId, TaskRecord, TaskState, TaskType};
pub use tree::{flatten, FlatEntry, TaskNode, TaskTree};

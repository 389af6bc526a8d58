//! Dashboard view-model.
//!
//! Turns published snapshots into display rows, tracks the selection and
//! the sync state, and keeps the most recent notifications.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tmon_core::{FlatEntry, RetryBudget, TaskDuration, TaskId, TaskState, TaskType};

use crate::locale::{Locale, Text};
use crate::notify::{Level, Notification};
use crate::sync::{SyncEvent, TaskSnapshot};

/// Notifications kept for display; older ones are dropped.
pub const MAX_NOTIFICATIONS: usize = 20;

// ============================================================================
// Sync State
// ============================================================================

/// How fresh the displayed tree is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No snapshot yet.
    #[default]
    Connecting,

    /// The last fetch succeeded.
    Live,

    /// Recent fetches failed; the displayed tree is the last good one.
    Degraded {
        since: DateTime<Utc>,
        failures: u32,
    },
}

// ============================================================================
// Rows
// ============================================================================

/// One display row of the flattened hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: TaskId,
    pub display_level: u32,
    pub owner: String,
    pub task_type: TaskType,
    pub state: TaskState,
    pub start_time: DateTime<Utc>,
    /// Live elapsed time, as of the last `refresh_elapsed`.
    pub elapsed: TaskDuration,
    pub retry: RetryBudget,
    pub blocking: bool,
    pub child_count: usize,
    pub stop_reason: Option<String>,
}

impl TaskRow {
    pub fn from_entry(entry: &FlatEntry<'_>, now: DateTime<Utc>) -> Self {
        let record = entry.record;
        Self {
            id: record.id,
            display_level: entry.display_level,
            owner: record.owner.clone(),
            task_type: record.task_type,
            state: record.state,
            start_time: record.start_time,
            elapsed: record.elapsed_at(now),
            retry: record.retry_budget(),
            blocking: entry.blocking,
            child_count: entry.child_count,
            stop_reason: record.stop_reason.clone(),
        }
    }

    /// Owner name indented by depth, with a marker on the task its parent
    /// is blocked on.
    pub fn tree_label(&self) -> String {
        let indent = "  ".repeat(self.display_level as usize);
        let marker = if self.blocking { "* " } else { "" };
        format!("{indent}{marker}{}", self.owner)
    }
}

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub state: SyncState,

    snapshot: Arc<TaskSnapshot>,

    rows: Vec<TaskRow>,

    /// Index into `rows`.
    pub selected_index: usize,

    notifications: VecDeque<Notification>,

    pub should_quit: bool,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub fn new() -> Self {
        Self {
            state: SyncState::Connecting,
            snapshot: Arc::new(TaskSnapshot::default()),
            rows: Vec::new(),
            selected_index: 0,
            notifications: VecDeque::new(),
            should_quit: false,
        }
    }

    /// Replaces the rows with the snapshot's flattening.
    ///
    /// The selection follows the previously selected task id when it is
    /// still present.
    pub fn apply_snapshot(&mut self, snapshot: Arc<TaskSnapshot>, now: DateTime<Utc>) {
        let selected_id = self.selected_row().map(|row| row.id);

        self.rows = snapshot
            .tree
            .flatten()
            .iter()
            .map(|entry| TaskRow::from_entry(entry, now))
            .collect();
        if !snapshot.is_initial() {
            self.state = SyncState::Live;
        }
        self.snapshot = snapshot;

        if let Some(index) =
            selected_id.and_then(|id| self.rows.iter().position(|row| row.id == id))
        {
            self.selected_index = index;
        }
        self.clamp_selection();
    }

    /// Recomputes live elapsed times against `now`.
    pub fn refresh_elapsed(&mut self, now: DateTime<Utc>) {
        for row in &mut self.rows {
            row.elapsed = TaskDuration::between(row.start_time, now);
        }
    }

    /// Folds a synchronizer event into the sync state and notifications.
    pub fn handle_sync_event(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Updated { .. } => {
                if matches!(self.state, SyncState::Degraded { .. }) {
                    self.push_notification(Notification::success("Connection restored"));
                }
                self.state = SyncState::Live;
            }
            SyncEvent::FetchFailed {
                message, transient, ..
            } => {
                self.state = match self.state {
                    SyncState::Degraded { since, failures } => SyncState::Degraded {
                        since,
                        failures: failures.saturating_add(1),
                    },
                    SyncState::Connecting | SyncState::Live => SyncState::Degraded {
                        since: Utc::now(),
                        failures: 1,
                    },
                };
                let level = if *transient { Level::Warning } else { Level::Error };
                self.push_notification(Notification::new(
                    level,
                    format!("Refresh failed: {message}"),
                ));
            }
        }
    }

    pub fn push_notification(&mut self, notification: Notification) {
        if self.notifications.len() >= MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification);
    }

    /// Notifications, oldest first.
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    pub fn rows(&self) -> &[TaskRow] {
        &self.rows
    }

    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    fn clamp_selection(&mut self) {
        let count = self.rows.len();
        if count == 0 {
            self.selected_index = 0;
        } else if self.selected_index >= count {
            self.selected_index = count.saturating_sub(1);
        }
    }

    pub fn selected_row(&self) -> Option<&TaskRow> {
        self.rows.get(self.selected_index)
    }

    /// Moves the selection down, wrapping around.
    pub fn select_next(&mut self) {
        let count = self.rows.len();
        if count == 0 {
            self.selected_index = 0;
            return;
        }
        self.selected_index = (self.selected_index.saturating_add(1)) % count;
    }

    /// Moves the selection up, wrapping around.
    pub fn select_previous(&mut self) {
        let count = self.rows.len();
        if count == 0 {
            self.selected_index = 0;
            return;
        }
        if self.selected_index == 0 {
            self.selected_index = count.saturating_sub(1);
        } else {
            self.selected_index = self.selected_index.saturating_sub(1);
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn task_count(&self) -> usize {
        self.rows.len()
    }

    pub fn active_count(&self) -> usize {
        self.rows.iter().filter(|row| row.state.is_active()).count()
    }

    /// Plain-text table of the current rows.
    pub fn render(&self, locale: Locale) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} ({}/{})",
            locale.text(Text::TaskTree),
            self.active_count(),
            self.task_count()
        );

        if self.rows.is_empty() {
            let _ = writeln!(out, "  {}", locale.text(Text::NoTasks));
            return out;
        }

        let _ = writeln!(
            out,
            "  {:>5}  {:<32}  {:<8}  {:<10}  {:>8}  {:>7}",
            locale.text(Text::Id),
            locale.text(Text::Owner),
            locale.text(Text::Type),
            locale.text(Text::State),
            locale.text(Text::Elapsed),
            locale.text(Text::Retries),
        );
        for (index, row) in self.rows.iter().enumerate() {
            let cursor = if index == self.selected_index { '>' } else { ' ' };
            let _ = writeln!(
                out,
                "{cursor} {:>5}  {:<32}  {:<8}  {:<10}  {:>8}  {:>7}",
                row.id,
                row.tree_label(),
                row.task_type.to_string(),
                row.state.to_string(),
                row.elapsed.format(),
                row.retry.to_string(),
            );
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tmon_core::{TaskRecord, TaskTree};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_312_800 + secs, 0).single().unwrap()
    }

    fn record(id: u32, state: TaskState) -> TaskRecord {
        let mut record = TaskRecord::new(id, TaskType::Task, format!("owner-{id}"), state);
        record.start_time = at(0);
        record
    }

    fn snapshot(seq: u64, root: TaskRecord) -> Arc<TaskSnapshot> {
        Arc::new(TaskSnapshot {
            tree: TaskTree::from_root(root),
            seq,
            fetched_at: Some(at(0)),
        })
    }

    #[test]
    fn test_rows_follow_flattening() {
        let root = record(1, TaskState::Running)
            .with_children(vec![record(3, TaskState::Running), record(2, TaskState::Init)]);
        let mut dashboard = Dashboard::new();
        dashboard.apply_snapshot(snapshot(1, root), at(90));

        let ids: Vec<u32> = dashboard.rows().iter().map(|r| r.id.get()).collect();
        let levels: Vec<u32> = dashboard.rows().iter().map(|r| r.display_level).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(levels, vec![0, 1, 1]);
        assert_eq!(dashboard.state, SyncState::Live);
        assert_eq!(dashboard.active_count(), 2);
    }

    #[test]
    fn test_elapsed_uses_render_time() {
        let mut dashboard = Dashboard::new();
        dashboard.apply_snapshot(snapshot(1, record(1, TaskState::Running)), at(5));
        assert_eq!(dashboard.rows()[0].elapsed.format(), "5s");

        dashboard.refresh_elapsed(at(125));
        assert_eq!(dashboard.rows()[0].elapsed.format(), "2m 5s");
    }

    #[test]
    fn test_selection_follows_task_across_snapshots() {
        let first = record(1, TaskState::Running)
            .with_children(vec![record(2, TaskState::Running), record(3, TaskState::Running)]);
        let mut dashboard = Dashboard::new();
        dashboard.apply_snapshot(snapshot(1, first), at(1));
        dashboard.select_next();
        dashboard.select_next();
        assert_eq!(dashboard.selected_row().map(|r| r.id.get()), Some(3));

        let second = record(1, TaskState::Running).with_children(vec![record(3, TaskState::Running)]);
        dashboard.apply_snapshot(snapshot(2, second), at(2));
        assert_eq!(dashboard.selected_row().map(|r| r.id.get()), Some(3));
    }

    #[test]
    fn test_selection_wraps() {
        let root = record(1, TaskState::Running).with_children(vec![record(2, TaskState::Running)]);
        let mut dashboard = Dashboard::new();
        dashboard.apply_snapshot(snapshot(1, root), at(1));

        dashboard.select_previous();
        assert_eq!(dashboard.selected_index, 1);
        dashboard.select_next();
        assert_eq!(dashboard.selected_index, 0);
    }

    #[test]
    fn test_fetch_failures_degrade_then_recover() {
        let mut dashboard = Dashboard::new();
        let failed = SyncEvent::FetchFailed {
            seq: 2,
            message: "Request timed out after 5000ms".to_string(),
            transient: true,
        };

        dashboard.handle_sync_event(&failed);
        dashboard.handle_sync_event(&failed);
        assert!(matches!(dashboard.state, SyncState::Degraded { failures: 2, .. }));
        assert_eq!(dashboard.notifications().count(), 2);

        dashboard.handle_sync_event(&SyncEvent::Updated { seq: 3, tasks: 1 });
        assert_eq!(dashboard.state, SyncState::Live);
        let last = dashboard.notifications().last().unwrap();
        assert_eq!(last.level, Level::Success);
    }

    #[test]
    fn test_notifications_are_bounded() {
        let mut dashboard = Dashboard::new();
        for i in 0..(MAX_NOTIFICATIONS + 5) {
            dashboard.push_notification(Notification::info(format!("n{i}")));
        }
        assert_eq!(dashboard.notifications().count(), MAX_NOTIFICATIONS);
        assert_eq!(dashboard.notifications().next().unwrap().message, "n5");
    }

    #[test]
    fn test_render_lists_rows_and_retry_budget() {
        let mut child = record(2, TaskState::Running);
        child.retry_count = 4;
        child.max_retry = -1;
        let root = record(1, TaskState::Running).with_children(vec![child]);
        let mut dashboard = Dashboard::new();
        dashboard.apply_snapshot(snapshot(1, root), at(3));

        let text = dashboard.render(Locale::En);
        assert!(text.starts_with("Task Tree (2/2)"));
        assert!(text.contains("  owner-2"));
        assert!(text.contains("4 / ∞"));
        assert!(text.contains("RUNNING"));
        // Ids are right-aligned in a five-wide column.
        assert!(text.contains("    1  owner-1"));
        assert!(text.contains("    2    owner-2"));
    }

    #[test]
    fn test_render_empty() {
        let dashboard = Dashboard::new();
        assert!(dashboard.render(Locale::Zh).contains("暂无任务"));
    }
}

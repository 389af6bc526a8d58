//! Live synchronizer for the task hierarchy.
//!
//! A single background task polls the tree source, replaces the whole
//! snapshot on success and keeps the last good one on failure. Consumers
//! read snapshots through a `watch` channel, so they only ever see fully
//! built trees.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::{ClientError, Result};
use crate::gateway::TreeSource;
use tmon_core::{TaskRecord, TaskTree};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Time between polls.
    pub poll_interval: Duration,
    /// Upper bound on a single fetch, on top of any transport timeout.
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for SyncConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            fetch_timeout: config.timeout(),
        }
    }
}

// ============================================================================
// Snapshot and Events
// ============================================================================

/// One applied hierarchy snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    pub tree: TaskTree,
    /// Sequence number of the fetch that produced it; 0 before the first.
    pub seq: u64,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// True until the first successful fetch.
    pub fn is_initial(&self) -> bool {
        self.seq == 0
    }
}

/// Events emitted by the synchronizer for the UI's notification area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A new snapshot was published.
    Updated { seq: u64, tasks: usize },
    /// A fetch failed; the previous snapshot stays in place.
    FetchFailed {
        seq: u64,
        message: String,
        transient: bool,
    },
}

/// What [`SnapshotPublisher::apply`] did with a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer result was already applied; this one was discarded.
    Stale,
    Failed,
}

/// Owns the published snapshot and the stale-result guard.
#[derive(Debug)]
pub struct SnapshotPublisher {
    snapshots: watch::Sender<Arc<TaskSnapshot>>,
    events: mpsc::UnboundedSender<SyncEvent>,
    applied_seq: u64,
}

impl SnapshotPublisher {
    pub fn new(
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> (Self, watch::Receiver<Arc<TaskSnapshot>>) {
        let (snapshots, rx) = watch::channel(Arc::new(TaskSnapshot::default()));
        (
            Self {
                snapshots,
                events,
                applied_seq: 0,
            },
            rx,
        )
    }

    /// Sequence number of the snapshot currently published.
    pub fn applied_seq(&self) -> u64 {
        self.applied_seq
    }

    /// Applies the result of fetch `seq`.
    ///
    /// Results not newer than the applied snapshot are dropped, failures
    /// included. A failure leaves the snapshot untouched and emits exactly
    /// one [`SyncEvent::FetchFailed`].
    pub fn apply(&mut self, seq: u64, result: Result<Option<TaskRecord>>) -> ApplyOutcome {
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "Discarding stale fetch result");
            return ApplyOutcome::Stale;
        }

        match result {
            Ok(root) => {
                let tree = TaskTree::from_optional_root(root);
                let tasks = tree.len();
                self.applied_seq = seq;
                self.snapshots.send_replace(Arc::new(TaskSnapshot {
                    tree,
                    seq,
                    fetched_at: Some(Utc::now()),
                }));
                debug!(seq, tasks, "Snapshot applied");
                self.emit(SyncEvent::Updated { seq, tasks });
                ApplyOutcome::Applied
            }
            Err(err) => {
                warn!(seq, error = %err, "Task tree fetch failed, keeping last snapshot");
                self.emit(SyncEvent::FetchFailed {
                    seq,
                    message: err.to_string(),
                    transient: err.is_transient(),
                });
                ApplyOutcome::Failed
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // Ignore send errors - the UI may be shutting down
        let _ = self.events.send(event);
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Polling loop. Construct through [`Synchronizer::spawn`].
pub struct Synchronizer {
    source: Arc<dyn TreeSource>,
    config: SyncConfig,
    publisher: SnapshotPublisher,
    refresh_rx: mpsc::Receiver<()>,
    cancel_token: CancellationToken,
    next_seq: u64,
}

impl Synchronizer {
    /// Starts polling on the current runtime.
    ///
    /// The first fetch happens immediately. The loop stops when
    /// `parent_token` is cancelled, on [`SyncHandle::stop`], or when the
    /// handle is dropped.
    pub fn spawn(
        source: Arc<dyn TreeSource>,
        config: SyncConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
        parent_token: &CancellationToken,
    ) -> SyncHandle {
        let (publisher, snapshots) = SnapshotPublisher::new(events);
        // Capacity 1: one pending refresh absorbs any number of requests.
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cancel_token = parent_token.child_token();

        let synchronizer = Self {
            source,
            config,
            publisher,
            refresh_rx,
            cancel_token: cancel_token.clone(),
            next_seq: 0,
        };
        let task = tokio::spawn(synchronizer.run());

        SyncHandle {
            snapshots,
            refresh_tx,
            cancel_token,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Synchronizer starting"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let manual = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                Some(()) = self.refresh_rx.recv() => true,
                _ = ticker.tick() => false,
            };

            self.next_seq = self.next_seq.saturating_add(1);
            let seq = self.next_seq;
            debug!(seq, manual, "Fetching task tree");

            let fetch = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch_tree());
            let result = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                result = fetch => match result {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::Timeout(self.config.fetch_timeout)),
                },
            };

            self.publisher.apply(seq, result);

            if manual {
                ticker.reset();
            }
        }

        info!(applied_seq = self.publisher.applied_seq(), "Synchronizer stopped");
    }
}

/// Control handle for a running [`Synchronizer`].
///
/// Dropping the handle stops the loop.
pub struct SyncHandle {
    snapshots: watch::Receiver<Arc<TaskSnapshot>>,
    refresh_tx: mpsc::Sender<()>,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<TaskSnapshot>> {
        self.snapshots.clone()
    }

    /// The snapshot currently published.
    pub fn snapshot(&self) -> Arc<TaskSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Requests an immediate fetch; the next tick then comes a full interval
    /// later. Returns false once the loop has stopped.
    pub fn refresh(&self) -> bool {
        match self.refresh_tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Refresh already pending, coalescing");
                true
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Cancels the loop and waits for it to exit. An in-flight fetch is
    /// abandoned and nothing is published after this returns.
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Synchronizer task ended abnormally");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmon_core::{TaskId, TaskState, TaskType};

    fn root(children: u32) -> TaskRecord {
        TaskRecord::new(1, TaskType::Job, "root", TaskState::Running).with_children(
            (2..2 + children)
                .map(|id| TaskRecord::new(id, TaskType::Task, "child", TaskState::Running))
                .collect(),
        )
    }

    #[test]
    fn test_apply_success_publishes() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let (mut publisher, rx) = SnapshotPublisher::new(tx);
        assert!(rx.borrow().is_initial());

        assert_eq!(publisher.apply(1, Ok(Some(root(2)))), ApplyOutcome::Applied);
        assert_eq!(rx.borrow().tree.len(), 3);
        assert_eq!(rx.borrow().seq, 1);
        assert_eq!(events.try_recv().unwrap(), SyncEvent::Updated { seq: 1, tasks: 3 });
    }

    #[test]
    fn test_stale_result_never_overwrites_newer() {
        let (tx, _events) = mpsc::unbounded_channel();
        let (mut publisher, rx) = SnapshotPublisher::new(tx);

        assert_eq!(publisher.apply(2, Ok(Some(root(4)))), ApplyOutcome::Applied);
        assert_eq!(publisher.apply(1, Ok(Some(root(0)))), ApplyOutcome::Stale);
        assert_eq!(publisher.apply(2, Ok(Some(root(0)))), ApplyOutcome::Stale);

        assert_eq!(rx.borrow().seq, 2);
        assert_eq!(rx.borrow().tree.len(), 5);
    }

    #[test]
    fn test_failure_keeps_snapshot_and_emits_once() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let (mut publisher, rx) = SnapshotPublisher::new(tx);
        publisher.apply(1, Ok(Some(root(1))));
        let _ = events.try_recv();

        let outcome = publisher.apply(2, Err(ClientError::Timeout(Duration::from_secs(5))));
        assert_eq!(outcome, ApplyOutcome::Failed);
        assert_eq!(rx.borrow().seq, 1);
        assert!(rx.borrow().tree.contains(TaskId::new(2)));

        match events.try_recv().unwrap() {
            SyncEvent::FetchFailed { seq, transient, .. } => {
                assert_eq!(seq, 2);
                assert!(transient);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_empty_root_publishes_empty_tree() {
        let (tx, _events) = mpsc::unbounded_channel();
        let (mut publisher, rx) = SnapshotPublisher::new(tx);
        publisher.apply(1, Ok(Some(root(1))));
        publisher.apply(2, Ok(None));
        assert!(rx.borrow().tree.is_empty());
        assert!(!rx.borrow().is_initial());
    }
}

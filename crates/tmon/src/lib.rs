//! tmon client - Library modules
//!
//! Client side of the task-orchestrator monitor: a gateway to the
//! orchestrator's HTTP API, a polling synchronizer that keeps a read-only
//! replica of the live task tree, a session-aware history query engine and
//! the small persisted preference store.
//!
//! # Architecture
//!
//! 1. **Synchronizer Task**: Polls the task tree and publishes whole
//!    snapshots through a `watch` channel, reporting failures as events
//! 2. **History Engine**: Answers filtered, paged history queries on demand
//! 3. **Main Loop** (in the binary): Renders snapshots and handles commands
//!
//! All tasks respect a shared `CancellationToken` for graceful shutdown.

pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod locale;
pub mod logging;
pub mod notify;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use app::{Dashboard, SyncState, TaskRow};
pub use config::MonitorConfig;
pub use error::{ClientError, Result};
pub use gateway::{HistorySource, TaskGateway, TreeSource};
pub use history::{HistoryEngine, HistoryPage};
pub use locale::{Locale, LocaleStore};
pub use notify::{Level, Notification};
pub use store::{MemoryPersistence, Persistence, Store, Subscription};
pub use sync::{SyncConfig, SyncEvent, SyncHandle, Synchronizer, TaskSnapshot};

//! History query engine.
//!
//! Wraps a [`HistorySource`] with session scoping, client-side filter
//! enforcement, pagination helpers and locally computed aggregates.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::gateway::HistorySource;
use crate::notify::{notify, Notification, NotificationSender};
use tmon_core::{
    is_last_page, page_count, HistoryFilter, HistoryRecord, HistoryStats, SessionId,
    SessionRecord, TaskId,
};

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    /// Records in remote order, all satisfying the filter.
    pub records: Vec<HistoryRecord>,
    /// Total reported by the remote, when it reports one.
    pub total: Option<u64>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub is_last_page: bool,
}

impl HistoryPage {
    /// Pages needed to show `total`, if known.
    pub fn page_count(&self) -> Option<u64> {
        self.total.map(|total| page_count(total, self.page_size))
    }
}

/// Session-aware history queries.
pub struct HistoryEngine {
    source: Arc<dyn HistorySource>,
    page_size: u32,
    notifications: NotificationSender,
    sessions: Vec<SessionRecord>,
    selected: Option<SessionId>,
    last_page: Option<HistoryPage>,
    last_stats: Option<HistoryStats>,
}

impl HistoryEngine {
    pub fn new(
        source: Arc<dyn HistorySource>,
        page_size: u32,
        notifications: NotificationSender,
    ) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            notifications,
            sessions: Vec::new(),
            selected: None,
            last_page: None,
            last_stats: None,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Fetches the orchestrator's current session and remembers it.
    ///
    /// Selects it when nothing is selected yet.
    pub async fn refresh_session(&mut self) -> Result<SessionRecord> {
        let session = match self.source.session_info().await {
            Ok(session) => session,
            Err(err) => {
                self.report("Failed to load session", &err);
                return Err(err);
            }
        };

        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(known) => *known = session.clone(),
            None => {
                info!(session_id = %session.id, "Discovered session");
                self.sessions.push(session.clone());
            }
        }
        if self.selected.is_none() {
            self.selected = Some(session.id.clone());
        }
        Ok(session)
    }

    /// Changes the scope used by [`query`](Self::query) and [`stats`](Self::stats).
    pub fn select_session(&mut self, session_id: SessionId) {
        debug!(session_id = %session_id, "Selecting session");
        if self.selected.as_ref() != Some(&session_id) {
            self.last_stats = None;
        }
        self.selected = Some(session_id);
    }

    pub fn selected_session(&self) -> Option<&SessionId> {
        self.selected.as_ref()
    }

    pub fn known_sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Adds the selected session when the filter names none.
    fn scoped(&self, mut filter: HistoryFilter) -> HistoryFilter {
        if filter.session_id.is_none() {
            filter.session_id = self.selected.clone();
        }
        filter
    }

    /// Runs one paged query.
    ///
    /// Without a limit the engine's page size is used. On failure the last
    /// successful page stays available through [`last_page`](Self::last_page).
    pub async fn query(&mut self, filter: HistoryFilter) -> Result<HistoryPage> {
        let mut filter = self.scoped(filter);
        let limit = filter.limit.filter(|l| *l > 0).unwrap_or(self.page_size);
        let offset = filter.offset.unwrap_or(0);
        filter.limit = Some(limit);
        filter.offset = Some(offset);

        let response = match self.source.query_history(&filter).await {
            Ok(response) => response,
            Err(err) => {
                self.report("History query failed", &err);
                return Err(err);
            }
        };

        let returned = response.records().len();
        let records: Vec<HistoryRecord> = response
            .records()
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        if records.len() < returned {
            warn!(
                dropped = returned - records.len(),
                "History response contained records outside the filter"
            );
        }

        let page = HistoryPage {
            records,
            total: response.total,
            page: offset / limit + 1,
            page_size: limit,
            is_last_page: is_last_page(returned, Some(limit)),
        };
        self.last_page = Some(page.clone());
        Ok(page)
    }

    /// The last successful [`query`](Self::query) result.
    pub fn last_page(&self) -> Option<&HistoryPage> {
        self.last_page.as_ref()
    }

    /// Walks pages of `page_size` and concatenates them, without duplicates.
    ///
    /// Paging is advisory to the remote, so the walk ends at the first of:
    /// a short page, a page larger than requested (limit ignored), a page
    /// with nothing new (offset ignored), or the reported total reached.
    pub async fn collect_all(
        &self,
        filter: HistoryFilter,
        page_size: u32,
    ) -> Result<Vec<HistoryRecord>> {
        let filter = self.scoped(filter.without_page());
        let limit = page_size.max(1);
        let mut seen: HashSet<(SessionId, TaskId)> = HashSet::new();
        let mut all = Vec::new();
        let mut offset = 0u32;

        loop {
            let page_filter = filter.clone().page(limit, offset);
            let response = self.source.query_history(&page_filter).await?;
            let records = response.records();
            let returned = records.len();

            let mut fresh = 0usize;
            for record in records {
                if !seen.insert(record.key()) {
                    continue;
                }
                fresh += 1;
                if filter.matches(record) {
                    all.push(record.clone());
                }
            }

            if is_last_page(returned, Some(limit)) {
                break;
            }
            if returned > limit as usize {
                warn!(returned, limit, "History source ignored the page limit");
                break;
            }
            if fresh == 0 {
                warn!(offset, "History source ignored the page offset");
                break;
            }
            if response.total.is_some_and(|total| seen.len() as u64 >= total) {
                break;
            }
            offset = offset.saturating_add(limit);
        }

        debug!(records = all.len(), "Collected history");
        Ok(all)
    }

    /// Aggregates over the selected session's full history.
    ///
    /// Loads the current session first when none is selected.
    pub async fn stats(&mut self) -> Result<HistoryStats> {
        let session_id = match self.selected.clone() {
            Some(id) => id,
            None => self.refresh_session().await?.id,
        };

        let filter = HistoryFilter::new().session(session_id.clone());
        let records = match self.collect_all(filter, self.page_size).await {
            Ok(records) => records,
            Err(err) => {
                self.report("History statistics failed", &err);
                return Err(err);
            }
        };

        let stats = HistoryStats::aggregate(session_id, &records);
        self.last_stats = Some(stats.clone());
        Ok(stats)
    }

    /// The last successful [`stats`](Self::stats) result.
    pub fn last_stats(&self) -> Option<&HistoryStats> {
        self.last_stats.as_ref()
    }

    fn report(&self, context: &str, err: &ClientError) {
        warn!(error = %err, "{context}");
        notify(&self.notifications, Notification::from_error(context, err));
    }
}

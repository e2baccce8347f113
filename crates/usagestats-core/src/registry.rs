//! Registry of per-client stats
//!
//! The registry owns one [`ContextualizedStats`] per [`StatsContext`]. Each
//! entry sits behind its own mutex so traces for one client are folded in one
//! at a time, while traces for different clients proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::models::{StatsContext, Trace};
use crate::report::StatsReport;
use crate::stats::ContextualizedStats;

/// Stats for every client seen in the current reporting window
pub struct StatsRegistry {
    contexts: DashMap<StatsContext, Mutex<ContextualizedStats>>,
    window_start: Mutex<DateTime<Utc>>,
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRegistry {
    /// Create an empty registry whose window starts now
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            window_start: Mutex::new(Utc::now()),
        }
    }

    /// Fold a trace into the stats for `context`
    pub fn add_trace(&self, context: &StatsContext, trace: &Trace) {
        if let Some(stats) = self.contexts.get(context) {
            stats.lock().add_trace(trace);
            return;
        }

        self.contexts
            .entry(context.clone())
            .or_insert_with(|| Mutex::new(ContextualizedStats::new(context.clone())))
            .lock()
            .add_trace(trace);
    }

    /// Number of clients with stats in the current window
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Check if no traces were added in the current window
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Copy of the stats for one client
    pub fn snapshot(&self, context: &StatsContext) -> Option<ContextualizedStats> {
        self.contexts.get(context).map(|stats| stats.lock().clone())
    }

    /// Take everything collected so far and start a new window
    ///
    /// Traces added while draining land either in the returned report or in
    /// the next window, never both.
    pub fn drain(&self) -> StatsReport {
        let end_time = Utc::now();
        let start_time = std::mem::replace(&mut *self.window_start.lock(), end_time);

        let keys: Vec<StatsContext> = self
            .contexts
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let drained: Vec<ContextualizedStats> = keys
            .iter()
            .filter_map(|key| self.contexts.remove(key))
            .map(|(_, stats)| stats.into_inner())
            .collect();

        debug!(contexts = drained.len(), "Drained stats registry");

        StatsReport::new(start_time, end_time, drained)
    }
}

//! Drained snapshots of the stats registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StatsContext;
use crate::stats::ContextualizedStats;

/// Stats collected over one reporting window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStatsReport")]
pub struct StatsReport {
    /// Start of the window
    pub start_time: DateTime<Utc>,

    /// End of the window
    pub end_time: DateTime<Utc>,

    /// One entry per client context, sorted by context
    pub traces_per_context: Vec<ContextualizedStats>,
}

/// Decoded report before its entries are put in context order
#[derive(Deserialize)]
struct RawStatsReport {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    traces_per_context: Vec<ContextualizedStats>,
}

impl From<RawStatsReport> for StatsReport {
    fn from(raw: RawStatsReport) -> Self {
        Self::new(raw.start_time, raw.end_time, raw.traces_per_context)
    }
}

impl StatsReport {
    /// Create a report from per-context stats
    ///
    /// Entries are sorted by context and entries sharing a context are merged.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        mut traces_per_context: Vec<ContextualizedStats>,
    ) -> Self {
        traces_per_context.sort_by(|a, b| a.stats_context.cmp(&b.stats_context));

        let mut merged: Vec<ContextualizedStats> = Vec::with_capacity(traces_per_context.len());
        for stats in traces_per_context {
            match merged.last_mut() {
                Some(last) if last.stats_context == stats.stats_context => last.merge(&stats),
                _ => merged.push(stats),
            }
        }

        Self {
            start_time,
            end_time,
            traces_per_context: merged,
        }
    }

    /// Total requests across all contexts
    pub fn trace_count(&self) -> u64 {
        self.traces_per_context
            .iter()
            .map(|stats| stats.query_latency_stats.request_count)
            .sum()
    }

    /// Check if the report carries no requests
    pub fn is_empty(&self) -> bool {
        self.trace_count() == 0
    }

    /// Stats for one context
    pub fn context(&self, context: &StatsContext) -> Option<&ContextualizedStats> {
        self.traces_per_context
            .binary_search_by(|stats| stats.stats_context.cmp(context))
            .ok()
            .map(|index| &self.traces_per_context[index])
    }

    /// Add another report into this one
    ///
    /// The window widens to cover both reports.
    pub fn merge(&mut self, other: &StatsReport) {
        self.start_time = self.start_time.min(other.start_time);
        self.end_time = self.end_time.max(other.end_time);

        for theirs in &other.traces_per_context {
            match self
                .traces_per_context
                .binary_search_by(|stats| stats.stats_context.cmp(&theirs.stats_context))
            {
                Ok(index) => self.traces_per_context[index].merge(theirs),
                Err(index) => self.traces_per_context.insert(index, theirs.clone()),
            }
        }
    }
}

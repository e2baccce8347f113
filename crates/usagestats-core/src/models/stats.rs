//! Aggregate statistics data model

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::histogram::DurationHistogram;

/// Client identity that aggregates are grouped by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct StatsContext {
    /// Client name as reported by the caller
    pub client_reference_id: String,

    /// Client version as reported by the caller
    pub client_version: String,
}

impl StatsContext {
    /// Create a context
    pub fn new(client_reference_id: impl Into<String>, client_version: impl Into<String>) -> Self {
        Self {
            client_reference_id: client_reference_id.into(),
            client_version: client_version.into(),
        }
    }
}

/// Error counts for one response path, with children keyed by path segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathErrorStats {
    /// Child paths keyed by response name or `service:<name>` segment
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub children: HashMap<String, PathErrorStats>,

    /// Number of node visits at exactly this path that had errors
    pub requests_with_errors_count: u64,

    /// Total errors at exactly this path
    pub errors_count: u64,
}

impl PathErrorStats {
    /// Walk down `path`, creating missing nodes along the way
    pub fn descend<S: AsRef<str>>(&mut self, path: &[S]) -> &mut PathErrorStats {
        path.iter().fold(self, |node, segment| {
            node.children.entry(segment.as_ref().to_owned()).or_default()
        })
    }

    /// Look up a direct child
    pub fn child(&self, segment: &str) -> Option<&PathErrorStats> {
        self.children.get(segment)
    }

    /// Look up a descendant by path
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&PathErrorStats> {
        path.iter()
            .try_fold(self, |node, segment| node.child(segment.as_ref()))
    }

    /// Add another tree into this one, path by path
    pub fn merge(&mut self, other: &PathErrorStats) {
        self.requests_with_errors_count += other.requests_with_errors_count;
        self.errors_count += other.errors_count;
        for (segment, theirs) in &other.children {
            self.children.entry(segment.clone()).or_default().merge(theirs);
        }
    }
}

/// Resolver cost for one field of one type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FieldStat {
    /// Declared return type, taken from the first observation
    pub return_type: String,

    /// Error count of the most recently observed resolver call
    ///
    /// This is overwritten on every observation rather than summed. Report
    /// consumers rely on that behaviour.
    pub errors_count: u64,

    /// Resolver calls observed
    pub count: u64,

    /// Resolver calls that had at least one error
    pub requests_with_errors_count: u64,

    /// Resolver durations
    pub latency_count: DurationHistogram,
}

impl FieldStat {
    /// Create an empty stat for a field returning `return_type`
    pub fn new(return_type: impl Into<String>) -> Self {
        Self {
            return_type: return_type.into(),
            ..Self::default()
        }
    }

    /// Add another shard's stat for the same field
    ///
    /// The incoming shard's `errors_count` wins when it saw the field at all,
    /// matching the overwrite behaviour of single-trace accounting.
    pub fn merge(&mut self, other: &FieldStat) {
        if self.return_type.is_empty() {
            self.return_type.clone_from(&other.return_type);
        }
        if other.count > 0 {
            self.errors_count = other.errors_count;
        }
        self.count += other.count;
        self.requests_with_errors_count += other.requests_with_errors_count;
        self.latency_count.combine(&other.latency_count);
    }
}

/// Field stats for one parent type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TypeStat {
    /// Stats keyed by schema field name
    pub per_field_stat: HashMap<String, FieldStat>,
}

impl TypeStat {
    /// Add another shard's stats for the same type
    pub fn merge(&mut self, other: &TypeStat) {
        for (field_name, theirs) in &other.per_field_stat {
            self.per_field_stat
                .entry(field_name.clone())
                .or_insert_with(|| FieldStat::new(theirs.return_type.clone()))
                .merge(theirs);
        }
    }
}

/// Request-level aggregate for one client context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueryLatencyStats {
    /// Requests seen
    pub request_count: u64,

    /// Durations of requests not served from the full-query cache
    pub latency_count: DurationHistogram,

    /// Requests served from the full-query cache
    pub cache_hits: u64,

    /// Durations of full-query cache hits
    pub cache_latency_count: DurationHistogram,

    /// Persisted query lookups that found the query
    pub persisted_query_hits: u64,

    /// Persisted query lookups that had to register the query
    pub persisted_query_misses: u64,

    /// Max-age of publicly cacheable responses
    pub public_cache_ttl_count: DurationHistogram,

    /// Max-age of privately cacheable responses
    pub private_cache_ttl_count: DurationHistogram,

    /// Requests for safelisted operations
    pub registered_operation_count: u64,

    /// Requests rejected by the safelist
    pub forbidden_operation_count: u64,

    /// Requests with at least one error anywhere in the trace
    pub requests_with_errors_count: u64,

    /// Root of the error path tree
    pub root_error_stats: PathErrorStats,
}

impl QueryLatencyStats {
    /// Add another shard's stats for the same context
    pub fn merge(&mut self, other: &QueryLatencyStats) {
        self.request_count += other.request_count;
        self.latency_count.combine(&other.latency_count);
        self.cache_hits += other.cache_hits;
        self.cache_latency_count.combine(&other.cache_latency_count);
        self.persisted_query_hits += other.persisted_query_hits;
        self.persisted_query_misses += other.persisted_query_misses;
        self.public_cache_ttl_count
            .combine(&other.public_cache_ttl_count);
        self.private_cache_ttl_count
            .combine(&other.private_cache_ttl_count);
        self.registered_operation_count += other.registered_operation_count;
        self.forbidden_operation_count += other.forbidden_operation_count;
        self.requests_with_errors_count += other.requests_with_errors_count;
        self.root_error_stats.merge(&other.root_error_stats);
    }
}

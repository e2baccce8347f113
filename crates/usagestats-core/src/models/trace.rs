//! Trace data model
//!
//! These types describe one completed request as recorded by the gateway.
//! They are read-only inputs to aggregation. Every field that a producer may
//! leave out is defaulted so partially populated traces still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility of a cached response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheScope {
    /// Scope was not reported
    #[default]
    Unknown,
    /// Response may be cached by shared caches
    Public,
    /// Response is specific to one user
    Private,
}

/// Cache policy computed for a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CachePolicy {
    /// Who may cache the response
    pub scope: CacheScope,

    /// Maximum age in nanoseconds
    pub max_age_ns: u64,
}

/// An error reported while resolving a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TraceError {
    /// Error message
    pub message: String,

    /// Raw JSON form of the error, if the producer kept it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
}

impl TraceError {
    /// Create an error with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            json: None,
        }
    }
}

/// One resolved field in an execution tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TraceNode {
    /// Name the field appears under in the response (alias if aliased)
    pub response_name: String,

    /// Field name as declared in the schema
    pub original_field_name: Option<String>,

    /// Type the field is declared on
    pub parent_type: Option<String>,

    /// Declared return type, e.g. `User!`
    #[serde(rename = "type")]
    pub return_type: Option<String>,

    /// Resolver start, nanoseconds relative to the trace start
    pub start_time: Option<u64>,

    /// Resolver end, nanoseconds relative to the trace start
    pub end_time: Option<u64>,

    /// Errors raised while resolving this field
    pub error: Vec<TraceError>,

    /// Child fields in response order
    pub child: Vec<TraceNode>,
}

impl TraceNode {
    /// Create an unnamed node
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of errors on this node
    pub fn error_count(&self) -> u64 {
        self.error.len() as u64
    }

    /// Check if the node has any errors
    pub fn has_errors(&self) -> bool {
        !self.error.is_empty()
    }

    /// Resolver duration, saturating to zero when the timestamps are inverted
    pub fn duration_ns(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// A fetch against a downstream service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FetchNode {
    /// Name of the service that executed the fetch
    pub service_name: String,

    /// Trace the service returned for its part of the request
    pub trace: Option<Box<Trace>>,
}

/// Node of the gateway's query plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPlanNode {
    /// Request sent to one service
    Fetch(FetchNode),

    /// Merge of a nested node's results into a list in the response
    Flatten {
        /// The wrapped node
        node: Option<Box<QueryPlanNode>>,
    },

    /// Nodes executed concurrently
    Parallel {
        /// Nodes in plan order
        #[serde(default)]
        nodes: Vec<QueryPlanNode>,
    },

    /// Nodes executed one after the other
    Sequence {
        /// Nodes in execution order
        #[serde(default)]
        nodes: Vec<QueryPlanNode>,
    },
}

impl QueryPlanNode {
    /// Create a fetch node
    pub fn fetch(service_name: impl Into<String>, trace: Trace) -> Self {
        Self::Fetch(FetchNode {
            service_name: service_name.into(),
            trace: Some(Box::new(trace)),
        })
    }

    /// Create a flatten node around `node`
    pub fn flatten(node: QueryPlanNode) -> Self {
        Self::Flatten {
            node: Some(Box::new(node)),
        }
    }
}

/// One request's execution record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Trace {
    /// When the request started
    pub start_time: Option<DateTime<Utc>>,

    /// When the request finished
    pub end_time: Option<DateTime<Utc>>,

    /// Total duration in nanoseconds
    pub duration_ns: u64,

    /// Root of the execution tree, absent when no resolver ran
    pub root: Option<TraceNode>,

    /// Query plan, present only for federated requests
    pub query_plan: Option<QueryPlanNode>,

    /// Response was served entirely from the full-query cache
    pub full_query_cache_hit: bool,

    /// Cache policy of the response
    pub cache_policy: Option<CachePolicy>,

    /// Query text was found in the persisted query store
    pub persisted_query_hit: bool,

    /// Query text was registered in the persisted query store
    pub persisted_query_register: bool,

    /// Operation was rejected by the safelist
    pub forbidden_operation: bool,

    /// Operation was found in the safelist
    pub registered_operation: bool,
}

impl Trace {
    /// Create an empty trace with the given duration
    pub fn with_duration(duration_ns: u64) -> Self {
        Self {
            duration_ns,
            ..Self::default()
        }
    }
}

//! # UsageStats
//!
//! Usage statistics aggregation for a federated GraphQL gateway.
//!
//! Every completed request produces a trace describing which fields were
//! resolved, by which service, how long they took, and which errors they
//! raised. This crate folds those traces into compact, mergeable per-client
//! aggregates so a reporter can ship a small summary instead of raw traces.
//!
//! ## Architecture
//!
//! - **Histogram**: mergeable exponential latency histogram
//! - **Walker**: visits execution trees and the sub-traces embedded in a query plan
//! - **Stats**: per-client aggregation of one trace at a time
//! - **Registry**: per-client stats for the current reporting window
//! - **Reporter**: async ingest loop with periodic flushes to a sink
//!
//! ## Quick Start
//!
//! ```
//! use usagestats::prelude::*;
//!
//! let mut stats = ContextualizedStats::new(StatsContext::new("web", "1.0"));
//! stats.add_trace(&Trace::with_duration(30_000));
//! assert_eq!(stats.query_latency_stats.request_count, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod histogram;
pub mod models;
pub mod registry;
pub mod report;
pub mod reporter;
pub mod stats;
pub mod telemetry;
pub mod walker;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::histogram::DurationHistogram;
    pub use crate::models::*;
    pub use crate::registry::StatsRegistry;
    pub use crate::report::StatsReport;
    pub use crate::reporter::{ReportSink, ReportingPipeline};
    pub use crate::stats::ContextualizedStats;
    pub use crate::walker::{iterate_over_trace, TraceNodeVisitor};
}

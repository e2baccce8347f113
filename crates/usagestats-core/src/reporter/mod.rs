//! Reporter module - periodic delivery of aggregated stats
//!
//! Traces flow into a [`ReportingPipeline`], which aggregates them per client
//! and hands a [`crate::report::StatsReport`] to a [`ReportSink`] on every
//! flush interval.

mod pipeline;
mod sink;

pub use pipeline::{ContextualizedTrace, PipelineConfig, PipelineStats, ReportingPipeline};
pub use sink::{ChannelSink, LogSink, ReportSink};

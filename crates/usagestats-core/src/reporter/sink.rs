//! Destinations for drained stats reports

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Error, Result};
use crate::report::StatsReport;

/// Receiver of periodic stats reports
///
/// Encoding and transport of the report belong to the implementation.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver one report
    async fn send(&self, report: StatsReport) -> Result<()>;
}

/// Sink that writes a summary of each report to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn send(&self, report: StatsReport) -> Result<()> {
        for stats in &report.traces_per_context {
            let latency = &stats.query_latency_stats;
            info!(
                client = %stats.stats_context.client_reference_id,
                client_version = %stats.stats_context.client_version,
                requests = latency.request_count,
                cache_hits = latency.cache_hits,
                requests_with_errors = latency.requests_with_errors_count,
                types = stats.per_type_stat.len(),
                "Stats report entry"
            );
        }
        info!(
            start = %report.start_time,
            end = %report.end_time,
            traces = report.trace_count(),
            "Stats report"
        );
        Ok(())
    }
}

/// Sink that forwards reports over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StatsReport>,
}

impl ChannelSink {
    /// Create a sink and the receiver reports arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StatsReport>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReportSink for ChannelSink {
    async fn send(&self, report: StatsReport) -> Result<()> {
        self.tx
            .send(report)
            .await
            .map_err(|_| Error::sink("report receiver dropped"))
    }
}

//! Reporting pipeline for traces
//!
//! The pipeline receives traces tagged with their client context, folds them
//! into a [`StatsRegistry`], and on every flush interval drains the registry
//! and hands the resulting report to a [`ReportSink`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::ReportingConfig;
use crate::error::{Error, Result};
use crate::models::{StatsContext, Trace};
use crate::registry::StatsRegistry;

use super::sink::ReportSink;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often to drain the registry
    pub flush_interval: Duration,
    /// Buffer size for incoming traces
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        ReportingConfig::default().into()
    }
}

impl From<ReportingConfig> for PipelineConfig {
    fn from(config: ReportingConfig) -> Self {
        Self {
            flush_interval: config.flush_interval,
            channel_capacity: config.channel_capacity,
        }
    }
}

/// A trace together with the client it was recorded for
#[derive(Debug, Clone)]
pub struct ContextualizedTrace {
    /// Client the trace belongs to
    pub context: StatsContext,
    /// The trace itself
    pub trace: Trace,
}

struct Receivers {
    traces: mpsc::Receiver<ContextualizedTrace>,
    shutdown: mpsc::Receiver<()>,
}

/// Processing pipeline for traces
pub struct ReportingPipeline {
    config: PipelineConfig,
    trace_tx: mpsc::Sender<ContextualizedTrace>,
    shutdown_tx: mpsc::Sender<()>,
    receivers: Mutex<Option<Receivers>>,
    registry: Arc<StatsRegistry>,
    sink: Arc<dyn ReportSink>,
}

impl ReportingPipeline {
    /// Create a new pipeline delivering reports to `sink`
    pub fn new(config: PipelineConfig, sink: Arc<dyn ReportSink>) -> Self {
        let (trace_tx, traces) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown) = mpsc::channel(1);

        Self {
            config,
            trace_tx,
            shutdown_tx,
            receivers: Mutex::new(Some(Receivers { traces, shutdown })),
            registry: Arc::new(StatsRegistry::new()),
            sink,
        }
    }

    /// Submit a trace for aggregation
    pub async fn submit(&self, context: StatsContext, trace: Trace) -> Result<()> {
        self.trace_tx
            .send(ContextualizedTrace { context, trace })
            .await
            .map_err(|e| Error::channel(e.to_string()))
    }

    /// Submit a batch of traces, returning how many were accepted
    pub async fn submit_batch(&self, traces: Vec<ContextualizedTrace>) -> usize {
        let mut count = 0;
        for item in traces {
            if self.submit(item.context, item.trace).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Run the aggregation loop until [`Self::stop`] is called
    ///
    /// Traces still queued at shutdown are aggregated and flushed before this
    /// returns.
    pub async fn start(&self) {
        let receivers = self.receivers.lock().take();
        let Some(Receivers {
            mut traces,
            mut shutdown,
        }) = receivers
        else {
            error!("Pipeline already started");
            return;
        };

        info!(
            flush_interval = ?self.config.flush_interval,
            channel_capacity = self.config.channel_capacity,
            "Reporting pipeline started"
        );

        let mut flush_interval = interval(self.config.flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(item) = traces.recv() => {
                    self.registry.add_trace(&item.context, &item.trace);
                }

                _ = flush_interval.tick() => {
                    self.flush().await;
                }

                _ = shutdown.recv() => {
                    traces.close();
                    while let Some(item) = traces.recv().await {
                        self.registry.add_trace(&item.context, &item.trace);
                    }
                    self.flush().await;
                    info!("Reporting pipeline stopped");
                    break;
                }
            }
        }
    }

    /// Ask a running pipeline to flush and stop
    ///
    /// Returns immediately. Repeated calls before the pipeline reacts are
    /// no-ops.
    pub async fn stop(&self) -> Result<()> {
        match self.shutdown_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(e @ TrySendError::Closed(())) => Err(Error::channel(e.to_string())),
        }
    }

    /// Drain the registry and deliver the report, if it has any traces
    pub async fn flush(&self) {
        let report = self.registry.drain();
        if report.is_empty() {
            return;
        }

        let traces = report.trace_count();
        let contexts = report.traces_per_context.len();
        debug!(traces, contexts, "Flushing stats report");

        if let Err(e) = self.sink.send(report).await {
            error!(error = %e, traces, "Failed to deliver stats report");
        }
    }

    /// Registry the pipeline aggregates into
    pub fn registry(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            queue_capacity: self.trace_tx.capacity(),
            queue_max_capacity: self.config.channel_capacity,
            active_contexts: self.registry.context_count(),
        }
    }
}

/// Pipeline statistics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Current queue capacity (available slots)
    pub queue_capacity: usize,
    /// Maximum queue capacity
    pub queue_max_capacity: usize,
    /// Clients with stats waiting for the next flush
    pub active_contexts: usize,
}

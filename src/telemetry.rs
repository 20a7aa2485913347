//! Module containing components and utilities for telemetry (metrics, tracing, logging).
//!
//! Logs are written by a `tracing` subscriber configured from `RUST_LOG` and optionally also
//! published to Grafana Loki. Batch metrics are collected in a Prometheus registry and can be
//! dumped in the text exposition format once the run is over.
use std::path::Path;

use anyhow::{anyhow, Result};
use prometheus::{Encoder, Histogram, IntCounterVec, IntGauge, Registry, TextEncoder};
use prometheus_metric_storage::{MetricStorage, StorageRegistry};
use tokio::task::JoinHandle;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument, warn};
use tracing_loki::BackgroundTask;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::error::Error;
use crate::extract::ExtractSummary;

/// Prometheus metrics of a reconstruction run
#[derive(Debug, Clone, MetricStorage)]
#[metric(subsystem = "inventory")]
pub struct Metrics {
    /// Total count of log files by status
    #[metric(labels("status"))]
    pub files_total: IntCounterVec,

    /// Total count of non-blank log lines by classification status
    #[metric(labels("status"))]
    pub lines_total: IntCounterVec,

    /// Total count of records merged into the inventory by outcome
    #[metric(labels("outcome"))]
    pub merges_total: IntCounterVec,

    /// Number of distinct client identities in the inventory
    pub entries: IntGauge,

    /// Time in seconds to fetch and parse a single log file
    pub file_processing_seconds: Histogram,
}

impl Metrics {
    /// Publicly exposes `Metrics::instance(registry)` with custom [`Error::Metrics`]
    #[inline]
    pub fn get_or_create(registry: &StorageRegistry) -> Result<&Self> {
        Self::instance(registry).map_err(|e| anyhow!(Error::Metrics(e)))
    }

    /// Accounts the lines of a single processed file.
    pub fn record_lines(&self, summary: &ExtractSummary) {
        for (status, count) in [
            ("matched", summary.matched),
            ("skipped", summary.skipped),
            ("malformed", summary.malformed),
        ] {
            self.lines_total
                .with_label_values(&[status])
                .inc_by(count as u64);
        }
    }
}

/// Writes all metrics of `registry` to `path` in the Prometheus text format.
#[instrument(skip(registry))]
pub fn write_metrics(registry: &Registry, path: &Path) -> Result<(), Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    std::fs::write(path, buffer)?;
    info!("metrics written");
    Ok(())
}

/// Installs the global `tracing` subscriber.
///
/// If a Loki URL is configured, logs are also shipped by a background task which is returned
/// wrapped in a [`TracingExporter`].
pub fn init_tracing(cfg: &Config) -> Result<Option<TracingExporter>> {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new(&cfg.rust_log))
        .with(tracing_subscriber::fmt::layer());

    let Some(url) = cfg.loki.url.clone() else {
        subscriber.init();
        return Ok(None);
    };

    let (layer, task) = tracing_loki::builder()
        .label("application", env!("CARGO_PKG_NAME"))
        .and_then(|builder| builder.build_url(url))
        .map_err(|e| anyhow!(Error::Loki(e)))?;

    subscriber.with(layer).init();

    Ok(Some(TracingExporter::spawn(task)))
}

/// Publisher of tracing logs to Grafana Loki.
///
/// Wraps a `tokio` task [handle](tokio::task::JoinHandle) of a spawned
/// [`BackgroundTask`](tracing_loki::BackgroundTask).
pub struct TracingExporter {
    handle: JoinHandle<()>,
}

impl TracingExporter {
    /// Spawns given `task` and stores its handle to abort it during graceful shutdown
    pub fn spawn(task: BackgroundTask) -> Self {
        Self {
            handle: tokio::spawn(task),
        }
    }

    #[instrument(name = "loki", skip_all)]
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        subsys.on_shutdown_requested().await;

        warn!("shutting down log publisher");
        self.handle.abort();

        Ok(())
    }
}

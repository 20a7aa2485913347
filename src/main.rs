use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use client_inventory::config::Config;
use client_inventory::error::Error;
use client_inventory::pipeline::{InventoryJob, InventoryOutput, Reconstruction};
use client_inventory::source::Location;
use client_inventory::telemetry::{init_tracing, Metrics};
use client_inventory::trace::Classifier;
use prometheus::Registry;
use prometheus_metric_storage::StorageRegistry;
use tokio_graceful_shutdown::Toplevel;
use tracing::info;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // read configuration from env
    let cfg = Config::from_env()?;

    // setup tracing
    let loki = init_tracing(&cfg)?;

    info!(
        location = cfg.source.location.as_str(),
        workers = cfg.num_workers,
        "starting client inventory reconstruction"
    );

    let registry = Registry::new();
    let storage = StorageRegistry::new(registry.clone());
    let metrics = Metrics::get_or_create(&storage)?.clone();

    let source = Location::parse(&cfg.source.location)?.open().await?;

    let reconstruction = Reconstruction::new(
        source,
        Classifier::new(cfg.inventory.key_schema()),
        cfg.num_workers,
        cfg.source.retries,
        Duration::from_millis(cfg.source.retry_delay),
        metrics,
    );

    let output = InventoryOutput::new(
        PathBuf::from(&cfg.inventory.output),
        cfg.inventory.output_format()?,
        cfg.metrics.file.as_ref().map(PathBuf::from),
        registry,
    );

    let job = InventoryJob::new(reconstruction, output);

    let mut toplevel = Toplevel::new().start("Reconstruction", |subsys| job.run(subsys));

    if let Some(exporter) = loki {
        toplevel = toplevel.start("TracingExporter", |subsys| exporter.run(subsys));
    }

    toplevel
        .catch_signals()
        .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
        .await
        .map_err(|e| anyhow!(Error::ShutdownError(e)))
}

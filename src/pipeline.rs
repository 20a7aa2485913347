//! This module implements the batch driver which reconstructs the client inventory
//!
//! The [`Reconstruction`] lists all files of a [`LogSource`] once and feeds them through a stream
//! with bounded concurrency (`NUM_WORKERS`). For each file it:
//!  1. Downloads (and decompresses) the content, retrying failed downloads
//!  1. Extracts [`RequestRecord`](crate::trace::RequestRecord)s from the content on the blocking
//!     thread pool
//!  1. Hands the records back to the single task draining the stream, which is the only owner of
//!     the [`Inventory`] and merges them one by one
//!
//! A file that cannot be downloaded or decompressed is logged and skipped, it never fails the
//! run. Only a failure to enumerate the files does.
//!
//! The [`InventoryJob`] wraps a reconstruction into a subsystem: on a shutdown request it stops
//! starting new files, lets the files in flight finish and still emits the partial inventory.
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use derive_new::new;
use futures_util::{stream, StreamExt};
use prometheus::Registry;
use stream_cancel::{StreamExt as _, Tripwire};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::async_retry;
use crate::extract::{extract, ExtractSummary};
use crate::inventory::Inventory;
use crate::sink::{write_inventory, OutputFormat};
use crate::source::LogSource;
use crate::telemetry::{write_metrics, Metrics};
use crate::trace::{Classifier, RequestRecord};

/// Records extracted from a single log file.
struct ParsedFile {
    file: String,
    records: Vec<RequestRecord>,
    summary: ExtractSummary,
}

#[derive(new)]
pub struct Reconstruction {
    source: Arc<dyn LogSource>,
    classifier: Classifier,
    num_workers: usize,
    retries: u64,
    retry_delay: Duration,
    metrics: Metrics,
}

impl Reconstruction {
    /// Fetch and parse a single file, `None` if the file cannot be read.
    #[instrument(name = "file", skip(self))]
    async fn process(&self, file: String) -> Option<ParsedFile> {
        let timer = self.metrics.file_processing_seconds.start_timer();

        let fetched =
            async_retry(self.retries, self.retry_delay, || self.source.fetch(&file)).await;

        let content = match fetched {
            Ok(content) => content,
            Err(e) => {
                warn!(error = ?e, "skipping unreadable log file");
                self.metrics.files_total.with_label_values(&["failed"]).inc();
                timer.observe_duration();
                return None;
            }
        };

        debug!(bytes = content.len(), "log file fetched");

        let classifier = self.classifier;
        let parsed = tokio::task::spawn_blocking(move || {
            let mut requests = extract(&content, &file, classifier);
            let records: Vec<_> = requests.by_ref().collect();
            let summary = requests.summary();
            ParsedFile {
                file,
                records,
                summary,
            }
        })
        .await;

        timer.observe_duration();

        match parsed {
            Ok(parsed) => {
                self.metrics
                    .files_total
                    .with_label_values(&["processed"])
                    .inc();
                self.metrics.record_lines(&parsed.summary);
                Some(parsed)
            }
            Err(e) => {
                warn!(error = ?e, "log file parsing aborted");
                self.metrics.files_total.with_label_values(&["failed"]).inc();
                None
            }
        }
    }

    /// Merge the records of one file into the `inventory`.
    fn merge(&self, inventory: &mut Inventory, parsed: ParsedFile) {
        let ParsedFile {
            file,
            records,
            summary,
        } = parsed;

        for record in records {
            let outcome = inventory.merge(record);
            self.metrics
                .merges_total
                .with_label_values(&[outcome.as_str()])
                .inc();
        }

        self.metrics.entries.set(inventory.len() as i64);

        info!(
            file,
            matched = summary.matched,
            skipped = summary.skipped,
            malformed = summary.malformed,
            entries = inventory.len(),
            "log file reconciled"
        );
    }

    /// Run the reconstruction over all files of the source.
    ///
    /// Once `shutdown` fires no further files are started. The returned [`Inventory`] holds
    /// everything merged up to that point.
    #[instrument(name = "reconstruction", fields(location = self.source.location()), skip_all)]
    pub async fn run(self, shutdown: Tripwire) -> Result<Inventory> {
        let files =
            async_retry(self.retries, self.retry_delay, || self.source.list_files()).await?;

        info!(
            files = files.len(),
            workers = self.num_workers,
            "starting reconstruction"
        );

        let mut parsed_files = stream::iter(files)
            .take_until_if(shutdown)
            .map(|file| self.process(file))
            .buffer_unordered(self.num_workers);

        let mut inventory = Inventory::new();

        while let Some(parsed) = parsed_files.next().await {
            if let Some(parsed) = parsed {
                self.merge(&mut inventory, parsed);
            }
        }

        info!(entries = inventory.len(), "reconstruction finished");
        Ok(inventory)
    }
}

/// Destination of the finalized inventory and of the run metrics
#[derive(new)]
pub struct InventoryOutput {
    path: PathBuf,
    format: OutputFormat,
    metrics_file: Option<PathBuf>,
    registry: Registry,
}

impl InventoryOutput {
    pub fn emit(&self, inventory: &Inventory) -> Result<()> {
        let file = File::create(&self.path)?;
        let rows = write_inventory(inventory, self.format, BufWriter::new(file))?;
        info!(rows, output = %self.path.display(), "client inventory emitted");

        if let Some(path) = self.metrics_file.as_deref() {
            write_metrics(&self.registry, path)?;
        }

        Ok(())
    }
}

/// Top-level subsystem that runs a [`Reconstruction`] and emits its result
#[derive(new)]
pub struct InventoryJob {
    reconstruction: Reconstruction,
    output: InventoryOutput,
}

impl InventoryJob {
    #[instrument(name = "job", skip_all)]
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        let Self {
            reconstruction,
            output,
        } = self;

        // NOTE: when `trigger` is dropped, no further log files are started
        let (trigger, tripwire) = Tripwire::new();

        let reconstruction = reconstruction.run(tripwire);
        tokio::pin!(reconstruction);

        let inventory = tokio::select! {
            inventory = &mut reconstruction => inventory,
            _ = subsys.on_shutdown_requested() => {
                warn!("shutdown requested, finishing log files in flight");
                drop(trigger);
                reconstruction.await
            }
        };

        let result = inventory.and_then(|inventory| output.emit(&inventory));

        // the batch is done, stop the remaining subsystems
        subsys.request_global_shutdown();

        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use async_trait::async_trait;
    use prometheus_metric_storage::StorageRegistry;

    use super::*;
    use crate::trace::tests::{produce_scram, FETCH_TLS, PRODUCE_IAM};
    use crate::trace::AuthKind;

    /// In-memory source, files without content fail to download.
    struct MemorySource {
        files: HashMap<String, Option<Vec<u8>>>,
        fetches: AtomicUsize,
    }

    impl MemorySource {
        fn new<'a>(files: impl IntoIterator<Item = (&'a str, Option<String>)>) -> Self {
            Self {
                files: files
                    .into_iter()
                    .map(|(name, content)| (name.to_owned(), content.map(String::into_bytes)))
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LogSource for MemorySource {
        fn location(&self) -> String {
            "memory".to_owned()
        }

        async fn list_files(&self) -> Result<Vec<String>> {
            let mut files: Vec<_> = self.files.keys().cloned().collect();
            files.sort();
            Ok(files)
        }

        async fn fetch(&self, file: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.files.get(file) {
                Some(Some(content)) => Ok(content.clone()),
                _ => bail!("no such file: {file}"),
            }
        }
    }

    fn reconstruction(source: Arc<MemorySource>, registry: &StorageRegistry) -> Reconstruction {
        let metrics = Metrics::get_or_create(registry).unwrap().clone();
        Reconstruction::new(
            source,
            Classifier::default(),
            2,
            1,
            Duration::from_millis(1),
            metrics,
        )
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped() {
        let source = Arc::new(MemorySource::new([
            ("a.log", Some(PRODUCE_IAM.to_owned())),
            ("b.log", None),
            ("c.log", Some(format!("{FETCH_TLS}\nnot a trace line\n"))),
        ]));
        let registry = StorageRegistry::default();

        let (_trigger, tripwire) = Tripwire::new();
        let inventory = reconstruction(source.clone(), &registry)
            .run(tripwire)
            .await
            .unwrap();

        assert_eq!(inventory.len(), 2);
        let auth: Vec<_> = inventory.rows().map(|r| r.auth()).collect();
        assert_eq!(auth, [AuthKind::Iam, AuthKind::Tls]);

        // one attempt plus one retry for the missing file
        assert_eq!(source.fetches.load(Ordering::SeqCst), 4);

        let metrics = Metrics::get_or_create(&registry).unwrap();
        let files = |status| metrics.files_total.with_label_values(&[status]).get();
        assert_eq!(files("processed"), 2);
        assert_eq!(files("failed"), 1);
        assert_eq!(metrics.lines_total.with_label_values(&["skipped"]).get(), 1);
        assert_eq!(metrics.entries.get(), 2);
    }

    #[tokio::test]
    async fn most_recent_across_files() {
        let source = Arc::new(MemorySource::new([
            (
                "a.log",
                Some(produce_scram("2025-08-18 11:00:00,000", "p", "orders")),
            ),
            (
                "b.log",
                Some(produce_scram("2025-08-18 10:00:00,000", "p", "orders")),
            ),
        ]));
        let registry = StorageRegistry::default();

        let (_trigger, tripwire) = Tripwire::new();
        let inventory = reconstruction(source, &registry)
            .run(tripwire)
            .await
            .unwrap();

        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.rows().next().unwrap().source_file(), "a.log");
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let source = Arc::new(MemorySource::new([(
            "a.log",
            Some(PRODUCE_IAM.to_owned()),
        )]));
        let registry = StorageRegistry::default();

        let (trigger, tripwire) = Tripwire::new();
        drop(trigger);

        let inventory = reconstruction(source.clone(), &registry)
            .run(tripwire)
            .await
            .unwrap();

        assert!(inventory.is_empty());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn emits_output_and_metrics() {
        let source = Arc::new(MemorySource::new([(
            "a.log",
            Some(PRODUCE_IAM.to_owned()),
        )]));
        let registry = Registry::new();
        let storage = StorageRegistry::new(registry.clone());

        let (_trigger, tripwire) = Tripwire::new();
        let inventory = reconstruction(source, &storage)
            .run(tripwire)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output = InventoryOutput::new(
            dir.path().join("inventory.csv"),
            OutputFormat::Csv,
            Some(dir.path().join("inventory.prom")),
            registry,
        );
        output.emit(&inventory).unwrap();

        let csv = std::fs::read_to_string(dir.path().join("inventory.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("TESTING_PRODUCER-1"));

        let metrics = std::fs::read_to_string(dir.path().join("inventory.prom")).unwrap();
        assert!(metrics.contains("inventory_entries 1"));
    }
}

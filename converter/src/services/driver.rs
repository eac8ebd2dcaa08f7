use super::discovery::DocketDiscoverer;
use super::filter::Filters;
use crate::layout::DocketRoot;
use crate::processor::{ConvertConfig, DocketExtractor, StorageConfig, TableWriter};
use crate::storage::{Storage, StorageLocation};
use crate::utils::paths::OutputLayout;
use common::config::Settings;
use common::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const WRITE_PROBE: &str = ".test_write_permission";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    PermissionCheck,
    Discovering,
    Processing,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum DocketOutcome {
    Processed { tables: usize, failed_files: usize },
    Skipped { failed_files: usize },
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub processed: u64,
    pub skipped: u64,
    pub errored: u64,
    pub files_failed: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl RunStats {
    /// Processed dockets per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    fn record(&mut self, docket_id: &str, outcome: &Result<DocketOutcome>) {
        match outcome {
            Ok(DocketOutcome::Processed {
                tables,
                failed_files,
            }) => {
                self.processed += 1;
                self.files_failed += *failed_files as u64;
                info!(docket = docket_id, tables, failed_files, "Docket converted");
            }
            Ok(DocketOutcome::Skipped { failed_files }) => {
                self.skipped += 1;
                self.files_failed += *failed_files as u64;
                info!(docket = docket_id, "No data found, docket skipped");
            }
            Err(e) => {
                self.errored += 1;
                error!(docket = docket_id, error = %e, "Docket failed");
            }
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}, skipped: {}, errored: {}, failed files: {}, elapsed: {:.1}s, rate: {:.2} dockets/s",
            self.processed,
            self.skipped,
            self.errored,
            self.files_failed,
            self.elapsed.as_secs_f64(),
            self.rate()
        )
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub stats: RunStats,
    pub failed_dockets: Vec<(String, String)>,
    pub fatal: Option<Error>,
    pub error_tolerance: u64,
}

impl RunReport {
    /// Whether the process should exit with status zero.
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.stats.errored <= self.error_tolerance
    }
}

/// Everything a single docket conversion needs; shared by all workers.
struct DocketContext {
    extractor: DocketExtractor,
    output: Arc<dyn Storage>,
    layout: OutputLayout,
    writer: TableWriter,
}

impl DocketContext {
    async fn convert(&self, docket: &DocketRoot) -> Result<DocketOutcome> {
        let dataset = self.extractor.extract(docket).await?;
        let failed_files = dataset.failures.len();
        if dataset.is_empty() {
            return Ok(DocketOutcome::Skipped { failed_files });
        }

        // Encode everything first so nothing is published for a docket that
        // cannot be fully encoded.
        let mut encoded = Vec::new();
        for (table, rows) in dataset.tables() {
            let bytes = self.writer.encode(&docket.docket_id, table, rows)?;
            let target = self.layout.table_file(&docket.agency, &docket.docket_id, table);
            encoded.push((target, bytes));
        }

        self.output
            .create_dir_all(&self.layout.docket_dir(&docket.agency, &docket.docket_id))
            .await?;
        for (target, bytes) in &encoded {
            self.output.put_atomic(target, bytes).await?;
            debug!(file = %target, bytes = bytes.len(), "Table written");
        }

        Ok(DocketOutcome::Processed {
            tables: encoded.len(),
            failed_files,
        })
    }
}

/// Runs discovery and converts each discovered docket on a bounded pool.
pub struct ConversionDriver {
    source: StorageLocation,
    storage: StorageConfig,
    context: Arc<DocketContext>,
    filters: Arc<Filters>,
    catalog: Vec<String>,
    concurrency: usize,
    channel_capacity: usize,
    error_tolerance: u64,
    state: RunState,
}

impl ConversionDriver {
    pub fn new(config: &ConvertConfig, settings: &Settings, storage: StorageConfig) -> Result<Self> {
        let filters = Filters::new(
            config.agency_filter.as_deref(),
            config.docket_pattern.as_deref(),
        )?;
        let context = DocketContext {
            extractor: DocketExtractor::new(storage.source.clone()),
            output: storage.output.clone(),
            layout: OutputLayout::new(&config.source, config.output.clone()),
            writer: TableWriter::new(config.codec),
        };

        Ok(Self {
            source: config.source.clone(),
            storage,
            context: Arc::new(context),
            filters: Arc::new(filters),
            catalog: settings.agencies.codes.clone(),
            concurrency: config
                .concurrency
                .unwrap_or(settings.conversion.concurrency)
                .max(1),
            channel_capacity: settings.conversion.channel_capacity.max(1),
            error_tolerance: settings.conversion.error_tolerance,
            state: RunState::Init,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn output_root(&self) -> &StorageLocation {
        self.context.layout.root()
    }

    /// Source must be readable and listable; output must accept a write.
    pub async fn check_permissions(&self) -> Result<()> {
        self.storage.source.verify_access(&self.source).await?;
        debug!(source = %self.source, "Source is readable");

        let output_root = self.output_root();
        self.storage.output.create_dir_all(output_root).await?;
        let probe = output_root.child(WRITE_PROBE);
        self.storage.output.put_atomic(&probe, b"test").await?;
        self.storage.output.remove(&probe).await?;
        debug!(output = %output_root, "Output is writable");
        Ok(())
    }

    pub async fn run(&mut self, mut cancel: watch::Receiver<bool>) -> Result<RunReport> {
        let started = Instant::now();

        self.state = RunState::PermissionCheck;
        if let Err(e) = self.check_permissions().await {
            self.state = RunState::Failed;
            error!(error = %e, "Permission check failed, nothing was processed");
            return Err(e);
        }

        self.state = RunState::Discovering;
        info!(
            source = %self.source,
            output = %self.output_root(),
            concurrency = self.concurrency,
            "Starting conversion"
        );

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let discoverer = DocketDiscoverer::new(
            self.storage.source.clone(),
            self.filters.clone(),
            self.catalog.clone(),
        );
        let source = self.source.clone();
        let discovery = tokio::spawn(async move { discoverer.discover(&source, tx).await });

        let mut stats = RunStats::default();
        let mut failed_dockets = Vec::new();
        let mut fatal: Option<Error> = None;
        let mut in_flight = FuturesUnordered::new();
        let mut accepting = true;
        let mut cancel_open = true;

        loop {
            if accepting && *cancel.borrow() {
                accepting = false;
                stats.interrupted = true;
                warn!(in_flight = in_flight.len(), "Interrupted, finishing in-flight dockets");
            }
            if !accepting && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                changed = cancel.changed(), if accepting && cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
                Some(joined) = in_flight.next(), if !in_flight.is_empty() => {
                    let (docket_id, outcome): (String, Result<DocketOutcome>) = match joined {
                        Ok(done) => done,
                        Err(e) => ("<unknown>".to_string(), Err(Error::from(e))),
                    };
                    stats.record(&docket_id, &outcome);
                    println!(
                        "[{} processed | {} skipped | {} errored] {}",
                        stats.processed, stats.skipped, stats.errored, docket_id
                    );
                    if let Err(e) = outcome {
                        failed_dockets.push((docket_id, e.to_string()));
                        if e.is_fatal() && fatal.is_none() {
                            error!(error = %e, "Fatal storage error, no new dockets will start");
                            accepting = false;
                            fatal = Some(e);
                        }
                    }
                }
                next = rx.recv(), if accepting && in_flight.len() < self.concurrency => {
                    match next {
                        Some(docket) => {
                            self.state = RunState::Processing;
                            let context = self.context.clone();
                            in_flight.push(tokio::spawn(async move {
                                let outcome = context.convert(&docket).await;
                                (docket.docket_id, outcome)
                            }));
                        }
                        None => accepting = false,
                    }
                }
                else => break,
            }
        }

        drop(rx);
        if stats.interrupted || fatal.is_some() {
            discovery.abort();
        }
        match discovery.await {
            Ok(Ok(found)) => debug!(found, "Discovery task finished"),
            Ok(Err(e)) => {
                error!(error = %e, "Discovery failed");
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
            Err(e) if e.is_cancelled() => debug!("Discovery task cancelled"),
            Err(e) => {
                if fatal.is_none() {
                    fatal = Some(Error::from(e));
                }
            }
        }

        stats.elapsed = started.elapsed();
        self.state = if fatal.is_some() {
            RunState::Failed
        } else {
            RunState::Done
        };
        info!(%stats, state = ?self.state, "Conversion finished");

        Ok(RunReport {
            state: self.state,
            stats,
            failed_dockets,
            fatal,
            error_tolerance: self.error_tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Backend, LocalStorage};
    use std::path::Path;

    /// Local storage that refuses reads below any path containing `denied`.
    struct DeniedReads {
        inner: LocalStorage,
        denied: &'static str,
    }

    #[async_trait::async_trait]
    impl Storage for DeniedReads {
        fn backend(&self) -> Backend {
            Backend::Local
        }
        async fn exists(&self, location: &StorageLocation) -> Result<bool> {
            self.inner.exists(location).await
        }
        async fn is_dir(&self, location: &StorageLocation) -> Result<bool> {
            self.inner.is_dir(location).await
        }
        async fn list(&self, location: &StorageLocation) -> Result<Vec<String>> {
            self.inner.list(location).await
        }
        async fn glob(
            &self,
            location: &StorageLocation,
            pattern: &str,
        ) -> Result<Vec<StorageLocation>> {
            self.inner.glob(location, pattern).await
        }
        async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>> {
            if location.as_str().contains(self.denied) {
                return Err(Error::PermissionDenied(location.to_string()));
            }
            self.inner.read(location).await
        }
        async fn put_atomic(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
            self.inner.put_atomic(location, data).await
        }
        async fn create_dir_all(&self, location: &StorageLocation) -> Result<()> {
            self.inner.create_dir_all(location).await
        }
        async fn remove(&self, location: &StorageLocation) -> Result<()> {
            self.inner.remove(location).await
        }
        async fn verify_access(&self, location: &StorageLocation) -> Result<()> {
            self.inner.verify_access(location).await
        }
    }

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn local_storage() -> StorageConfig {
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new());
        StorageConfig {
            source: storage.clone(),
            output: storage,
            s3_manager: Arc::new(crate::storage::S3Manager::new(
                crate::storage::S3Config::from_settings(&Settings::default()),
            )),
        }
    }

    #[test]
    fn test_report_success_respects_tolerance() {
        let mut report = RunReport {
            state: RunState::Done,
            stats: RunStats::default(),
            failed_dockets: Vec::new(),
            fatal: None,
            error_tolerance: 1,
        };
        assert!(report.is_success());
        report.stats.errored = 2;
        assert!(!report.is_success());
        report.stats.errored = 0;
        report.fatal = Some(Error::PermissionDenied("out".into()));
        assert!(!report.is_success());
    }

    #[test]
    fn test_rate_without_elapsed_time() {
        let stats = RunStats {
            processed: 5,
            ..Default::default()
        };
        assert_eq!(stats.rate(), 0.0);
        let stats = RunStats {
            processed: 5,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.rate(), 2.5);
    }

    #[tokio::test]
    async fn test_missing_source_fails_permission_check() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConvertConfig::new(StorageLocation::local(tmp.path().join("absent")))
            .with_output(StorageLocation::local(tmp.path().join("out")));
        let mut driver =
            ConversionDriver::new(&config, &Settings::default(), local_storage()).unwrap();

        let (_tx, rx) = watch::channel(false);
        assert!(driver.run(rx).await.is_err());
        assert_eq!(driver.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_run_counts_processed_and_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("data");
        write(
            &source.join("raw-data/DEA/DEA-2016-0015/raw-data/docket/DEA-2016-0015.json"),
            r#"{"data": {"id": "DEA-2016-0015", "type": "dockets"}}"#,
        );
        std::fs::create_dir_all(source.join("raw-data/DEA/DEA-2016-0016/raw-data")).unwrap();

        let config = ConvertConfig::new(StorageLocation::local(&source)).with_concurrency(2);
        let mut driver =
            ConversionDriver::new(&config, &Settings::default(), local_storage()).unwrap();
        let (_tx, rx) = watch::channel(false);
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.stats.processed, 1);
        assert_eq!(report.stats.skipped, 1);
        assert!(report.is_success());
        assert!(source
            .join("derived-data/DEA/DEA-2016-0015/iceberg/docket_info.parquet")
            .exists());
        assert!(!source.join("derived-data/DEA/DEA-2016-0016").exists());
        assert!(!source.join("derived-data/.test_write_permission").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("data");
        write(
            &source.join("raw-data/DEA/DEA-2016-0015/raw-data/docket/DEA-2016-0015.json"),
            r#"{"data": {"id": "DEA-2016-0015"}}"#,
        );

        let config = ConvertConfig::new(StorageLocation::local(&source));
        let mut driver =
            ConversionDriver::new(&config, &Settings::default(), local_storage()).unwrap();
        let (_tx, rx) = watch::channel(true);
        let report = driver.run(rx).await.unwrap();

        assert!(report.stats.interrupted);
        assert_eq!(report.stats.processed, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_fatal_docket_error_stops_new_dockets() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("data");
        for id in ["DEA-2016-0001", "DEA-2016-0002", "DEA-2016-0003"] {
            write(
                &source.join(format!("raw-data/DEA/{id}/raw-data/docket/{id}.json")),
                &format!(r#"{{"data": {{"id": "{id}", "type": "dockets"}}}}"#),
            );
        }

        let mut storage = local_storage();
        storage.source = Arc::new(DeniedReads {
            inner: LocalStorage::new(),
            denied: "DEA-2016-0002",
        });
        let config = ConvertConfig::new(StorageLocation::local(&source)).with_concurrency(1);
        let mut driver = ConversionDriver::new(&config, &Settings::default(), storage).unwrap();
        let (_tx, rx) = watch::channel(false);
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(driver.state(), RunState::Failed);
        assert!(matches!(report.fatal, Some(Error::PermissionDenied(_))));
        assert!(!report.is_success());
        assert_eq!(report.stats.processed, 1);
        assert_eq!(report.stats.errored, 1);
        assert_eq!(report.failed_dockets[0].0, "DEA-2016-0002");

        let derived = source.join("derived-data/DEA");
        assert!(derived.join("DEA-2016-0001/iceberg/docket_info.parquet").exists());
        assert!(!derived.join("DEA-2016-0002").exists());
        assert!(!derived.join("DEA-2016-0003").exists());
    }
}

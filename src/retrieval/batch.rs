//! Batch coordination: many identifiers, bounded concurrency, durable
//! artifacts.
//!
//! The coordinator owns all filesystem state. Worker tasks only talk
//! to the network; results are re-associated with their identifier as
//! they complete, in whatever order that happens, and persisted from
//! the driver task so the manifest never sees concurrent writers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::models::{
    BatchItem, BatchSummary, Identifier, ItemStatus, RetrievalResult,
};
use crate::retrieval::{Retrieval, Retriever};

/// Name of the download index kept inside the output directory.
const MANIFEST_FILE: &str = ".paperclaw.json";

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> BatchError {
    BatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Maps normalized identifiers to the filename they were saved under.
/// This is the skip-existing index; an entry only counts if the file
/// is still present on disk.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub async fn load(output_dir: &Path) -> Result<Self, BatchError> {
        let path = output_dir.join(MANIFEST_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let entries = serde_json::from_str(&content).unwrap_or_default();
                Ok(Self { entries })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub async fn save(&self, output_dir: &Path) -> Result<(), BatchError> {
        let path = output_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            BatchError::Encode {
                path: path.clone(),
                source,
            }
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_err(&path, e))
    }

    /// Path of an already-downloaded file for this identifier, if the
    /// manifest knows one and it still exists.
    pub fn existing_file(&self, output_dir: &Path, identifier: &Identifier) -> Option<PathBuf> {
        let candidate = match self.entries.get(&identifier.normalized) {
            Some(filename) => output_dir.join(filename),
            // An unindexed but slug-named file also counts as present.
            None => output_dir.join(format!("{}.pdf", identifier.slug())),
        };
        candidate.is_file().then_some(candidate)
    }

    pub fn record(&mut self, identifier: &Identifier, filename: &str) {
        self.entries
            .insert(identifier.normalized.clone(), filename.to_string());
    }

    pub fn is_taken(&self, filename: &str) -> bool {
        self.entries.values().any(|f| f == filename)
    }

    /// Normalized identifiers with a recorded download, in sorted
    /// order. Feeds the plain-identifier export.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub skip_existing: bool,
    /// Hard wall-clock limit for the whole batch.
    pub deadline: Option<Duration>,
    /// Draw a progress bar on stderr.
    pub progress: bool,
}

impl BatchOptions {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            output_dir: config.downloads.output_dir.clone(),
            concurrency: config.downloads.concurrency,
            skip_existing: config.downloads.skip_existing,
            deadline: None,
            progress: false,
        }
    }
}

pub struct BatchCoordinator {
    retriever: Arc<Retriever>,
    options: BatchOptions,
}

impl BatchCoordinator {
    pub fn new(retriever: Arc<Retriever>, options: BatchOptions) -> Self {
        Self { retriever, options }
    }

    /// Run the whole batch. Always produces a summary, even when every
    /// identifier fails or the run is cancelled midway; only
    /// filesystem trouble is an error.
    pub async fn run(
        &self,
        identifiers: Vec<Identifier>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<BatchSummary, BatchError> {
        let out = &self.options.output_dir;
        tokio::fs::create_dir_all(out)
            .await
            .map_err(|e| io_err(out, e))?;
        let mut manifest = Manifest::load(out).await?;

        let mut items: Vec<BatchItem> = Vec::new();
        let mut to_dispatch: Vec<Identifier> = Vec::new();

        for identifier in identifiers {
            match self
                .options
                .skip_existing
                .then(|| manifest.existing_file(out, &identifier))
                .flatten()
            {
                Some(path) => {
                    debug!(id = %identifier, path = %path.display(), "already present, skipping");
                    items.push(BatchItem {
                        status: ItemStatus::Skipped,
                        result: RetrievalResult {
                            identifier,
                            success: true,
                            source_used: None,
                            output_path: Some(path),
                            attempts: Vec::new(),
                        },
                    });
                }
                None => to_dispatch.push(identifier),
            }
        }

        let bar = self.progress_bar(to_dispatch.len());
        let gate = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks: JoinSet<(Identifier, Retrieval)> = JoinSet::new();
        for identifier in to_dispatch {
            let retriever = Arc::clone(&self.retriever);
            let gate = Arc::clone(&gate);
            tasks.spawn(async move {
                // Semaphore never closes; a failed acquire means the
                // task itself was aborted.
                let _permit = gate.acquire().await;
                let retrieval = retriever.retrieve(&identifier).await;
                (identifier, retrieval)
            });
        }

        let deadline = self
            .options
            .deadline
            .map(|d| tokio::time::Instant::now() + d);
        let mut interrupted = false;

        while !tasks.is_empty() {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    if let Some(item) = self.collect(&mut manifest, joined).await? {
                        if let Some(bar) = &bar {
                            bar.inc(1);
                        }
                        items.push(item);
                    }
                }
                _ = cancelled(&mut cancel) => {
                    info!("cancellation requested, aborting in-flight work");
                    interrupted = true;
                    break;
                }
                _ = maybe_sleep_until(deadline), if deadline.is_some() => {
                    info!("batch deadline reached, aborting in-flight work");
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            tasks.abort_all();
            // Persist whatever still finished before the abort landed.
            while let Some(joined) = tasks.join_next().await {
                if let Some(item) = self.collect(&mut manifest, joined).await? {
                    items.push(item);
                }
            }
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let summary = summarize(items, interrupted);
        manifest.save(out).await?;
        self.write_summary(&summary).await?;
        Ok(summary)
    }

    /// Turn one joined worker into a batch item. Aborted workers yield
    /// nothing; their identifier is simply absent from the summary.
    async fn collect(
        &self,
        manifest: &mut Manifest,
        joined: Result<(Identifier, Retrieval), tokio::task::JoinError>,
    ) -> Result<Option<BatchItem>, BatchError> {
        match joined {
            Ok((identifier, retrieval)) => self
                .persist_item(manifest, identifier, retrieval)
                .await
                .map(Some),
            Err(join_err) if join_err.is_cancelled() => Ok(None),
            Err(join_err) => {
                error!(error = %join_err, "batch worker panicked");
                Ok(None)
            }
        }
    }

    /// Write one finished item's artifacts: the PDF for a success, a
    /// diagnostic record under `failed/` otherwise.
    async fn persist_item(
        &self,
        manifest: &mut Manifest,
        identifier: Identifier,
        retrieval: Retrieval,
    ) -> Result<BatchItem, BatchError> {
        let out = &self.options.output_dir;
        let mut result = retrieval.result;

        let Some(paper) = retrieval.paper else {
            let failed_dir = out.join("failed");
            tokio::fs::create_dir_all(&failed_dir)
                .await
                .map_err(|e| io_err(&failed_dir, e))?;
            let path = failed_dir.join(format!("{}.json", identifier.slug()));
            let json = serde_json::to_string_pretty(&result).map_err(|source| {
                BatchError::Encode {
                    path: path.clone(),
                    source,
                }
            })?;
            tokio::fs::write(&path, json)
                .await
                .map_err(|e| io_err(&path, e))?;
            return Ok(BatchItem {
                status: ItemStatus::Failed,
                result,
            });
        };

        let mut filename = paper.meta.derive_filename(&identifier);
        // Two distinct papers can derive the same name; disambiguate
        // with the identifier slug rather than overwrite.
        if manifest.is_taken(&filename) {
            filename = format!("{}_{}", identifier.slug(), filename);
        }
        let path = out.join(&filename);
        tokio::fs::write(&path, &paper.bytes)
            .await
            .map_err(|e| io_err(&path, e))?;
        manifest.record(&identifier, &filename);
        result.output_path = Some(path);

        Ok(BatchItem {
            status: ItemStatus::Downloaded,
            result,
        })
    }

    async fn write_summary(&self, summary: &BatchSummary) -> Result<(), BatchError> {
        let path = self.options.output_dir.join("batch_summary.json");
        let json = serde_json::to_string_pretty(summary).map_err(|source| BatchError::Encode {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_err(&path, e))
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.options.progress || total == 0 {
            return None;
        }
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg} [{elapsed}]")
        {
            bar.set_style(style);
        }
        Some(bar)
    }
}

/// Resolves once cancellation is signalled; pends forever if the
/// sender is gone without ever signalling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn maybe_sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn summarize(items: Vec<BatchItem>, interrupted: bool) -> BatchSummary {
    let count = |status: ItemStatus| items.iter().filter(|i| i.status == status).count();
    BatchSummary {
        downloaded: count(ItemStatus::Downloaded),
        skipped: count(ItemStatus::Skipped),
        failed: count(ItemStatus::Failed),
        interrupted,
        items,
    }
}

/// Newline-delimited list of successfully downloaded identifiers,
/// consumed by the downstream bibliography tooling.
pub async fn export_identifiers(output_dir: &Path, dest: &Path) -> Result<usize, BatchError> {
    let manifest = Manifest::load(output_dir).await?;
    let mut body = String::new();
    let mut count = 0;
    for id in manifest.identifiers() {
        body.push_str(id);
        body.push('\n');
        count += 1;
    }
    tokio::fs::write(dest, body)
        .await
        .map_err(|e| io_err(dest, e))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::sources::mock::{ConcurrencyGauge, MockSource};
    use crate::sources::{
        RegisteredSource, SourceClient, SourceDescriptor, SourceKind, SourceRegistry,
    };
    use crate::utils::{SourceLimiter, TitleMatcher, DEFAULT_THRESHOLD};

    fn slot(client: Arc<MockSource>, priority: u32) -> RegisteredSource {
        RegisteredSource {
            descriptor: SourceDescriptor {
                name: client.id().to_string(),
                priority,
                enabled: true,
                kind: SourceKind::Metadata,
                last_resort: false,
                interval: Duration::ZERO,
                max_in_flight: 64,
            },
            client,
            limiter: Arc::new(SourceLimiter::unlimited()),
        }
    }

    fn coordinator(slots: Vec<RegisteredSource>, options: BatchOptions) -> BatchCoordinator {
        let retriever = Retriever::from_parts(
            SourceRegistry::from_parts(slots),
            TitleMatcher::new(DEFAULT_THRESHOLD),
        );
        BatchCoordinator::new(Arc::new(retriever), options)
    }

    fn options(dir: &Path, concurrency: usize) -> BatchOptions {
        BatchOptions {
            output_dir: dir.to_path_buf(),
            concurrency,
            skip_existing: true,
            deadline: None,
            progress: false,
        }
    }

    fn idents(n: usize) -> Vec<Identifier> {
        (0..n)
            .map(|i| Identifier::resolve(&format!("10.1234/paper.{i}")).unwrap())
            .collect()
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive for the whole test.
        Box::leak(Box::new(tx));
        rx
    }

    #[tokio::test]
    async fn test_all_downloaded_with_artifacts() {
        let dir = tempdir().unwrap();
        let coord = coordinator(
            vec![slot(Arc::new(MockSource::succeeding("mock")), 1)],
            options(dir.path(), 3),
        );

        let summary = coord.run(idents(3), no_cancel()).await.unwrap();
        assert_eq!(summary.downloaded, 3);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert!(!summary.interrupted);

        assert!(dir.path().join(MANIFEST_FILE).is_file());
        assert!(dir.path().join("batch_summary.json").is_file());
        for item in &summary.items {
            let path = item.result.output_path.as_ref().unwrap();
            assert!(path.is_file());
            let bytes = std::fs::read(path).unwrap();
            assert!(bytes.starts_with(b"%PDF"));
        }
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockSource::succeeding("mock"));
        let coord = coordinator(vec![slot(Arc::clone(&mock), 1)], options(dir.path(), 3));

        let first = coord.run(idents(4), no_cancel()).await.unwrap();
        assert_eq!(first.downloaded, 4);
        assert_eq!(mock.lookup_count(), 4);

        let second = coord.run(idents(4), no_cancel()).await.unwrap();
        assert_eq!(second.skipped, 4);
        assert_eq!(second.downloaded, 0);
        assert_eq!(mock.lookup_count(), 4, "no new network attempts on rerun");
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds() {
        let dir = tempdir().unwrap();
        let gauge = ConcurrencyGauge::new();
        let mock = Arc::new(
            MockSource::succeeding("mock")
                .with_delay(Duration::from_millis(40))
                .with_gauge(Arc::clone(&gauge)),
        );
        let coord = coordinator(vec![slot(mock, 1)], options(dir.path(), 3));

        let summary = coord.run(idents(8), no_cancel()).await.unwrap();
        assert_eq!(summary.downloaded, 8);
        assert!(
            gauge.peak() <= 3,
            "peak concurrency {} exceeded the limit",
            gauge.peak()
        );
    }

    #[tokio::test]
    async fn test_one_present_six_dispatched() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockSource::succeeding("mock"));
        let coord = coordinator(vec![slot(Arc::clone(&mock), 1)], options(dir.path(), 3));

        // Pre-place one identifier's file under its slug name.
        let present = &idents(7)[2];
        std::fs::write(
            dir.path().join(format!("{}.pdf", present.slug())),
            crate::sources::mock::MOCK_PDF,
        )
        .unwrap();

        let summary = coord.run(idents(7), no_cancel()).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 6);
        assert_eq!(mock.lookup_count(), 6);
    }

    #[tokio::test]
    async fn test_failures_isolated_and_recorded() {
        let dir = tempdir().unwrap();
        let coord = coordinator(
            vec![slot(Arc::new(MockSource::not_found("mock")), 1)],
            options(dir.path(), 2),
        );

        let summary = coord.run(idents(2), no_cancel()).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.downloaded, 0);

        for id in idents(2) {
            let diag = dir.path().join("failed").join(format!("{}.json", id.slug()));
            let content = std::fs::read_to_string(diag).unwrap();
            let result: RetrievalResult = serde_json::from_str(&content).unwrap();
            assert!(!result.success);
            assert_eq!(result.attempts.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_cancellation_yields_partial_summary() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockSource::succeeding("slow").with_delay(Duration::from_secs(5)));
        let coord = coordinator(vec![slot(mock, 1)], options(dir.path(), 2));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let summary = coord.run(idents(4), rx).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.downloaded, 0);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_export_identifiers() {
        let dir = tempdir().unwrap();
        let coord = coordinator(
            vec![slot(Arc::new(MockSource::succeeding("mock")), 1)],
            options(dir.path(), 3),
        );
        coord.run(idents(3), no_cancel()).await.unwrap();

        let dest = dir.path().join("identifiers.txt");
        let count = export_identifiers(dir.path(), &dest).await.unwrap();
        assert_eq!(count, 3);
        let body = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(body.lines().count(), 3);
        assert!(body.contains("10.1234/paper.0"));
    }
}

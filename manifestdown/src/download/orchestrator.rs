//! Download orchestrator.
//!
//! Dispatches one task per manifest file, at most `concurrency` of them
//! copying at once, and waits for all of them. A failing file never cancels
//! its siblings.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{MaterializeError, RunError};
use super::materializer::Materializer;
use super::observer::RunObserver;
use super::progress::ProgressBoard;
use super::report::{FileReport, RunReport};
use crate::config::RunConfig;
use crate::provider::ManifestHandle;

/// Materializes every file of a manifest under an output root.
#[derive(Debug)]
pub struct ManifestDownloader {
    config: RunConfig,
    cancellation: CancellationToken,
}

impl ManifestDownloader {
    /// Create a downloader for `config`.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Stop runs when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Maximum number of files copied at once.
    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Token that cancels this downloader's runs.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Materialize every file in `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] only when the output root cannot be prepared.
    /// File failures are reported in the [`RunReport`].
    pub async fn run(
        &self,
        manifest: &ManifestHandle,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunReport, RunError> {
        self.run_with_progress(manifest, Arc::new(ProgressBoard::new()), observer)
            .await
    }

    /// Materialize every file, registering units on a caller-owned board.
    pub async fn run_with_progress(
        &self,
        manifest: &ManifestHandle,
        board: Arc<ProgressBoard>,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunReport, RunError> {
        let indices: Vec<usize> = (0..manifest.files().len()).collect();
        self.run_indices(manifest, &indices, board, observer).await
    }

    /// Retry the files that failed in `previous`.
    ///
    /// Each retried file opens a fresh byte source. The returned report holds
    /// the new outcome for retried files and the previous outcome for the rest.
    pub async fn retry_failed(
        &self,
        manifest: &ManifestHandle,
        previous: RunReport,
        board: Arc<ProgressBoard>,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunReport, RunError> {
        let failed = previous.failed_indices();
        if failed.is_empty() {
            return Ok(previous);
        }

        info!(files = failed.len(), "Retrying failed files");
        let retried = self.run_indices(manifest, &failed, board, observer).await?;

        let cancelled = retried.cancelled;
        let mut files = previous.files;
        for report in retried.files {
            if let Some(slot) = files.iter_mut().find(|f| f.index == report.index) {
                *slot = report;
            }
        }

        Ok(RunReport { files, cancelled })
    }

    async fn run_indices(
        &self,
        manifest: &ManifestHandle,
        indices: &[usize],
        board: Arc<ProgressBoard>,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunReport, RunError> {
        let files = manifest.files();
        let selected = indices
            .iter()
            .map(|&index| {
                files
                    .get(index)
                    .map(|entry| (index, entry))
                    .ok_or(RunError::UnknownFile {
                        index,
                        files: files.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        prepare_output_root(&self.config.output_root).await?;

        let total_bytes: u64 = selected.iter().map(|(_, entry)| entry.length()).sum();
        observer.on_run_started(selected.len(), total_bytes);

        if selected.is_empty() {
            let report = RunReport::default();
            observer.on_run_finished(&report);
            return Ok(report);
        }

        let concurrency = self.concurrency();
        info!(
            files = selected.len(),
            total_bytes,
            concurrency,
            output = %self.config.output_root.display(),
            "Starting download"
        );

        let materializer = Arc::new(Materializer::from_config(
            &self.config,
            self.cancellation.clone(),
        ));
        let permits = Arc::new(Semaphore::new(concurrency));

        let mut handles = Vec::with_capacity(selected.len());
        for (index, entry) in selected {
            let entry = entry.clone();
            let path = entry.relative_path().to_string();
            let unit = board.register(index, entry.relative_path());
            let materializer = Arc::clone(&materializer);
            let permits = Arc::clone(&permits);
            let observer = Arc::clone(&observer);

            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquisition cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                let report = materializer.materialize(&entry, &unit, observer.as_ref()).await;
                if report.is_completed() {
                    observer.on_file_completed(&report);
                } else {
                    observer.on_file_failed(&report);
                }
                report
            });
            handles.push((index, path, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (index, path, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(path = %path, error = %e, "Download task aborted");
                    if let Some(unit) = board.get(index) {
                        unit.fail();
                    }
                    let report = FileReport::failed(
                        index,
                        path.clone(),
                        None,
                        MaterializeError::TaskAborted {
                            file: path,
                            reason: e.to_string(),
                        },
                    );
                    observer.on_file_failed(&report);
                    report
                }
            };
            reports.push(report);
        }

        reports.sort_by_key(|r| r.index);
        let report = RunReport {
            files: reports,
            cancelled: self.cancellation.is_cancelled(),
        };

        info!(
            completed = report.completed_count(),
            failed = report.failed_count(),
            bytes = report.bytes_written(),
            cancelled = report.cancelled,
            "Download finished"
        );
        observer.on_run_finished(&report);
        Ok(report)
    }
}

/// Create the output root, or check that the existing path is a directory.
async fn prepare_output_root(root: &Path) -> Result<(), RunError> {
    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RunError::OutputRootNotDirectory(root.to_path_buf())),
        Err(_) => {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|source| RunError::OutputRoot {
                    path: root.to_path_buf(),
                    source,
                })?;
            debug!(path = %root.display(), "Created output root");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::error::ErrorKind;
    use crate::download::observer::NoopObserver;
    use crate::download::progress::{ProgressUnit, UnitState};
    use crate::provider::memory::{entry, MemorySource};
    use crate::provider::{BoxFuture, ByteSource, ByteSourceFactory, FileEntry, SourceError};
    use parking_lot::Mutex;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    fn manifest(files: Vec<FileEntry>) -> ManifestHandle {
        ManifestHandle::new("Test", "1.0", "test.exe", files)
    }

    fn noop() -> Arc<dyn RunObserver> {
        Arc::new(NoopObserver)
    }

    #[derive(Default)]
    struct Recorder {
        started: AtomicUsize,
        completed: Mutex<Vec<String>>,
        failed: Mutex<Vec<String>>,
        finished: AtomicUsize,
    }

    impl RunObserver for Recorder {
        fn on_file_started(&self, _unit: &ProgressUnit) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_completed(&self, report: &FileReport) {
            self.completed.lock().push(report.path.clone());
        }

        fn on_file_failed(&self, report: &FileReport) {
            self.failed.lock().push(report.path.clone());
        }

        fn on_run_finished(&self, _report: &RunReport) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts sources that are open at the same time.
    #[derive(Default)]
    struct OpenGauge {
        open: AtomicUsize,
        peak: AtomicUsize,
    }

    /// Source factory that registers each open stream on a shared gauge.
    struct GaugedSource {
        gauge: Arc<OpenGauge>,
        length: usize,
    }

    impl ByteSourceFactory for GaugedSource {
        fn open(&self) -> BoxFuture<'_, Result<ByteSource, SourceError>> {
            Box::pin(async move {
                let now = self.gauge.open.fetch_add(1, Ordering::SeqCst) + 1;
                self.gauge.peak.fetch_max(now, Ordering::SeqCst);
                let reader = GaugedReader {
                    gauge: Arc::clone(&self.gauge),
                    remaining: self.length,
                    ready: false,
                };
                Ok(ByteSource::new(reader, self.length as u64))
            })
        }
    }

    /// Yields one byte per read, returning `Pending` in between.
    struct GaugedReader {
        gauge: Arc<OpenGauge>,
        remaining: usize,
        ready: bool,
    }

    impl AsyncRead for GaugedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Ok(()));
            }
            if !self.ready {
                self.ready = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            self.ready = false;
            self.remaining -= 1;
            buf.put_slice(b"x");
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for GaugedReader {
        fn drop(&mut self) {
            self.gauge.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounds_open_sources() {
        let dir = tempfile::tempdir().unwrap();
        let gauge = Arc::new(OpenGauge::default());
        let files = (0..10)
            .map(|i| {
                let source = GaugedSource {
                    gauge: Arc::clone(&gauge),
                    length: 32,
                };
                FileEntry::new(format!("f{}.bin", i), 32, Arc::new(source))
            })
            .collect();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path()).with_concurrency(2));

        let report = downloader.run(&manifest(files), noop()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.completed_count(), 10);
        assert_eq!(report.bytes_written(), 320);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_rejects_report_from_larger_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path()));
        let larger = manifest(vec![
            entry("a.txt", MemorySource::new(b"a".to_vec())),
            entry("b.txt", MemorySource::new(b"b".to_vec())),
            entry("c.txt", MemorySource::new(b"c".to_vec()).fail_on_open()),
        ]);
        let report = downloader.run(&larger, noop()).await.unwrap();
        assert_eq!(report.failed_indices(), vec![2]);

        let smaller = manifest(vec![entry("a.txt", MemorySource::new(b"a".to_vec()))]);
        let err = downloader
            .retry_failed(&smaller, report, Arc::new(ProgressBoard::new()), noop())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::UnknownFile { index: 2, files: 1 }));
    }

    #[test]
    fn test_concurrency_clamped() {
        let mut config = RunConfig::new("/out");
        config.concurrency = 0;
        let downloader = ManifestDownloader::new(config);
        assert_eq!(downloader.concurrency(), 1);
    }

    #[tokio::test]
    async fn test_empty_manifest_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let downloader = ManifestDownloader::new(RunConfig::new(&root));

        let report = downloader.run(&manifest(Vec::new()), noop()).await.unwrap();

        assert!(report.is_success());
        assert!(report.files.is_empty());
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_two_files_complete() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path()).with_concurrency(2));
        let manifest = manifest(vec![
            entry("a/b.txt", MemorySource::new(b"0123456789".to_vec())),
            entry("c.txt", MemorySource::new(Vec::new())),
        ]);
        let recorder = Arc::new(Recorder::default());

        let report = downloader
            .run(&manifest, Arc::clone(&recorder) as Arc<dyn RunObserver>)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.files[0].path, "a/b.txt");
        assert_eq!(report.files[1].path, "c.txt");
        assert_eq!(
            std::fs::read(dir.path().join("a").join("b.txt")).unwrap(),
            b"0123456789"
        );
        assert_eq!(std::fs::read(dir.path().join("c.txt")).unwrap().len(), 0);
        assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.completed.lock().len(), 2);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path()));
        let manifest = manifest(vec![
            entry("a/b.txt", MemorySource::new(b"0123456789".to_vec()).fail_after(4)),
            entry("c.txt", MemorySource::new(Vec::new())),
        ]);
        let recorder = Arc::new(Recorder::default());
        let board = Arc::new(ProgressBoard::new());

        let report = downloader
            .run_with_progress(&manifest, Arc::clone(&board), Arc::clone(&recorder) as Arc<dyn RunObserver>)
            .await
            .unwrap();

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed_indices(), vec![0]);
        assert_eq!(
            report.files[0].error().unwrap().kind(),
            ErrorKind::SourceRetrieval
        );
        assert!(report.files[1].is_completed());
        assert!(!dir.path().join("a").join("b.txt").exists());
        assert!(dir.path().join("c.txt").exists());
        assert_eq!(*recorder.failed.lock(), vec!["a/b.txt".to_string()]);

        assert_eq!(board.get(0).unwrap().state(), UnitState::Failed);
        assert_eq!(board.get(1).unwrap().state(), UnitState::Completed);
    }

    #[tokio::test]
    async fn test_output_root_is_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("file");
        std::fs::write(&root, b"x").unwrap();
        let downloader = ManifestDownloader::new(RunConfig::new(&root));

        let err = downloader.run(&manifest(Vec::new()), noop()).await.unwrap_err();

        assert!(matches!(err, RunError::OutputRootNotDirectory(_)));
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path())).with_cancellation(token);
        let manifest = manifest(vec![
            entry("a.txt", MemorySource::new(b"a".to_vec())),
            entry("b.txt", MemorySource::new(b"b".to_vec())),
        ]);

        let report = downloader.run(&manifest, noop()).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.failed_count(), 2);
        assert!(report
            .failures()
            .all(|f| f.error().unwrap().kind() == ErrorKind::Cancelled));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_retry_failed_merges_reports() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path()));
        let first = manifest(vec![
            entry("ok.txt", MemorySource::new(b"ok".to_vec())),
            entry("flaky.txt", MemorySource::new(b"flaky".to_vec()).fail_on_open()),
        ]);
        let report = downloader.run(&first, noop()).await.unwrap();
        assert_eq!(report.failed_indices(), vec![1]);

        // Same paths, second source healthy this time
        let second = manifest(vec![
            entry("ok.txt", MemorySource::new(b"ok".to_vec()).fail_on_open()),
            entry("flaky.txt", MemorySource::new(b"flaky".to_vec())),
        ]);
        let merged = downloader
            .retry_failed(&second, report, Arc::new(ProgressBoard::new()), noop())
            .await
            .unwrap();

        assert!(merged.is_success());
        assert_eq!(merged.files.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("flaky.txt")).unwrap(), b"flaky");
        assert_eq!(std::fs::read(dir.path().join("ok.txt")).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_retry_without_failures_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ManifestDownloader::new(RunConfig::new(dir.path()));
        let manifest = manifest(vec![entry("a.txt", MemorySource::new(b"a".to_vec()))]);
        let report = downloader.run(&manifest, noop()).await.unwrap();

        let again = downloader
            .retry_failed(&manifest, report, Arc::new(ProgressBoard::new()), noop())
            .await
            .unwrap();

        assert!(again.is_success());
        assert_eq!(again.files.len(), 1);
    }
}

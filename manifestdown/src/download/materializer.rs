//! Per-file materializer.
//!
//! Copies one [`FileEntry`]'s byte source into its destination under the
//! output root with a fixed-size buffer, advancing the file's
//! [`ProgressUnit`] after every write. Every error ends as a failed
//! [`FileReport`]; nothing escapes to sibling files.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{MaterializeError, TransferWarning};
use super::observer::RunObserver;
use super::path::resolve_destination;
use super::progress::ProgressUnit;
use super::report::FileReport;
use crate::config::{LengthPolicy, RunConfig, DEFAULT_BUFFER_SIZE};
use crate::provider::{ByteSource, FileEntry};

/// A finished copy.
struct Copied {
    bytes: u64,
    warning: Option<TransferWarning>,
}

/// Writes manifest files under an output root.
#[derive(Debug, Clone)]
pub struct Materializer {
    output_root: PathBuf,
    buffer_size: usize,
    length_policy: LengthPolicy,
    verify_checksums: bool,
    cancellation: CancellationToken,
}

impl Materializer {
    /// Create a materializer with default settings.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            length_policy: LengthPolicy::Strict,
            verify_checksums: true,
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a materializer from a run configuration.
    pub fn from_config(config: &RunConfig, cancellation: CancellationToken) -> Self {
        Self {
            output_root: config.output_root.clone(),
            buffer_size: config.buffer_size.max(1),
            length_policy: config.length_policy,
            verify_checksums: config.verify_checksums,
            cancellation,
        }
    }

    /// Set the copy buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set the length mismatch policy.
    pub fn with_length_policy(mut self, policy: LengthPolicy) -> Self {
        self.length_policy = policy;
        self
    }

    /// Enable or disable checksum verification.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Stop copying when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Output root files are written under.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Materialize `entry`, driving `unit` to a terminal state.
    pub async fn materialize(
        &self,
        entry: &FileEntry,
        unit: &ProgressUnit,
        observer: &dyn RunObserver,
    ) -> FileReport {
        let index = unit.index();
        let file = entry.relative_path();

        let destination = match resolve_destination(&self.output_root, file) {
            Ok(path) => path,
            Err(reason) => {
                unit.fail();
                debug!(file, %reason, "Rejected output path");
                return FileReport::failed(
                    index,
                    file,
                    None,
                    MaterializeError::InvalidPath {
                        file: file.to_string(),
                        reason,
                    },
                );
            }
        };

        match self.copy(entry, &destination, unit, observer).await {
            Ok(copied) => {
                unit.complete(copied.bytes);
                debug!(file, bytes = copied.bytes, "File materialized");
                let report = FileReport::completed(index, file, destination, copied.bytes);
                match copied.warning {
                    Some(warning) => report.with_warning(warning),
                    None => report,
                }
            }
            Err(error) => {
                unit.fail();
                debug!(file, error = %error, "File failed");
                FileReport::failed(index, file, Some(destination), error)
            }
        }
    }

    async fn or_cancelled<F: Future>(&self, file: &str, fut: F) -> Result<F::Output, MaterializeError> {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(MaterializeError::Cancelled {
                file: file.to_string(),
            }),
            output = fut => Ok(output),
        }
    }

    async fn copy(
        &self,
        entry: &FileEntry,
        destination: &Path,
        unit: &ProgressUnit,
        observer: &dyn RunObserver,
    ) -> Result<Copied, MaterializeError> {
        let file = entry.relative_path();

        if self.cancellation.is_cancelled() {
            return Err(MaterializeError::Cancelled {
                file: file.to_string(),
            });
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| MaterializeError::CreateDir {
                    file: file.to_string(),
                    dir: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut source = self
            .or_cancelled(file, entry.open_stream())
            .await?
            .map_err(|source| MaterializeError::SourceOpen {
                file: file.to_string(),
                source,
            })?;

        unit.activate(source.length());
        observer.on_file_started(unit);

        let mut output = open_destination(file, destination).await?;
        let result = self
            .stream(entry, &mut source, &mut output, destination, unit, observer)
            .await;

        if result.is_err() {
            drop(output);
            remove_partial(destination).await;
        }
        result
    }

    async fn stream(
        &self,
        entry: &FileEntry,
        source: &mut ByteSource,
        output: &mut fs::File,
        destination: &Path,
        unit: &ProgressUnit,
        observer: &dyn RunObserver,
    ) -> Result<Copied, MaterializeError> {
        let file = entry.relative_path();
        let expected = source.length();
        let write_error = |source: io::Error| MaterializeError::Write {
            file: file.to_string(),
            path: destination.to_path_buf(),
            source,
        };

        let mut hasher = entry
            .sha256()
            .filter(|_| self.verify_checksums)
            .map(|_| Sha256::new());
        let mut buffer = vec![0u8; self.buffer_size];
        let mut written: u64 = 0;

        loop {
            let read = self
                .or_cancelled(file, source.read(&mut buffer))
                .await?
                .map_err(|source| MaterializeError::SourceRead {
                    file: file.to_string(),
                    offset: written,
                    source,
                })?;
            if read == 0 {
                break;
            }

            let after = written + read as u64;
            if self.length_policy == LengthPolicy::Strict && after > expected {
                return Err(MaterializeError::IncompleteTransfer {
                    file: file.to_string(),
                    expected,
                    actual: after,
                });
            }

            let chunk = &buffer[..read];
            self.or_cancelled(file, output.write_all(chunk))
                .await?
                .map_err(write_error)?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(chunk);
            }

            written = after;
            unit.advance(read as u64);
            observer.on_progress(unit);
        }

        self.or_cancelled(file, output.flush())
            .await?
            .map_err(write_error)?;

        let mut warning = None;
        if written != expected {
            match self.length_policy {
                LengthPolicy::Strict => {
                    return Err(MaterializeError::IncompleteTransfer {
                        file: file.to_string(),
                        expected,
                        actual: written,
                    });
                }
                LengthPolicy::Warn => {
                    warn!(file, expected, actual = written, "Stream length differs from declared length");
                    warning = Some(TransferWarning::LengthMismatch {
                        expected,
                        actual: written,
                    });
                }
            }
        }

        if let (Some(hasher), Some(expected)) = (hasher, entry.sha256()) {
            let actual = format!("{:x}", hasher.finalize());
            if actual != expected {
                return Err(MaterializeError::ChecksumMismatch {
                    file: file.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(Copied {
            bytes: written,
            warning,
        })
    }
}

enum OpenFailure {
    Busy,
    Io(io::Error),
}

/// Open `path` for writing under an exclusive advisory lock, then truncate.
///
/// The file is truncated only after the lock is held, so a busy destination
/// is left untouched.
async fn open_destination(file: &str, path: &Path) -> Result<fs::File, MaterializeError> {
    let target = path.to_path_buf();
    let opened = tokio::task::spawn_blocking(move || -> Result<std::fs::File, OpenFailure> {
        let handle = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&target)
            .map_err(OpenFailure::Io)?;

        handle.try_lock_exclusive().map_err(|e| {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                OpenFailure::Busy
            } else {
                OpenFailure::Io(e)
            }
        })?;
        handle.set_len(0).map_err(OpenFailure::Io)?;
        Ok(handle)
    })
    .await
    .unwrap_or_else(|e| Err(OpenFailure::Io(io::Error::other(e.to_string()))));

    match opened {
        Ok(handle) => Ok(fs::File::from_std(handle)),
        Err(OpenFailure::Busy) => Err(MaterializeError::DestinationBusy {
            file: file.to_string(),
            path: path.to_path_buf(),
        }),
        Err(OpenFailure::Io(source)) => Err(MaterializeError::OpenDestination {
            file: file.to_string(),
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Remove a partially written destination. Failures are logged, not raised.
async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

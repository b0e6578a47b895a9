//! Per-file and per-run results.

use std::path::PathBuf;

use super::error::{MaterializeError, TransferWarning};

/// Result of materializing one file.
#[derive(Debug)]
pub enum MaterializeOutcome {
    /// The file was written; holds the number of bytes written.
    Completed(u64),
    /// The file failed.
    Failed(MaterializeError),
}

impl MaterializeOutcome {
    /// Whether the file completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, MaterializeOutcome::Completed(_))
    }

    /// Bytes written, for completed files.
    pub fn bytes_written(&self) -> Option<u64> {
        match self {
            MaterializeOutcome::Completed(n) => Some(*n),
            MaterializeOutcome::Failed(_) => None,
        }
    }

    /// The error, for failed files.
    pub fn error(&self) -> Option<&MaterializeError> {
        match self {
            MaterializeOutcome::Completed(_) => None,
            MaterializeOutcome::Failed(e) => Some(e),
        }
    }
}

/// Report for one manifest file.
#[derive(Debug)]
pub struct FileReport {
    /// Index of the file in the manifest.
    pub index: usize,
    /// Manifest path, as written in the manifest.
    pub path: String,
    /// Resolved destination, if the path was accepted.
    pub destination: Option<PathBuf>,
    pub outcome: MaterializeOutcome,
    /// Set when a completed file tripped a non-fatal check.
    pub warning: Option<TransferWarning>,
}

impl FileReport {
    /// Report a completed file.
    pub fn completed(index: usize, path: impl Into<String>, destination: PathBuf, bytes: u64) -> Self {
        Self {
            index,
            path: path.into(),
            destination: Some(destination),
            outcome: MaterializeOutcome::Completed(bytes),
            warning: None,
        }
    }

    /// Report a failed file.
    pub fn failed(
        index: usize,
        path: impl Into<String>,
        destination: Option<PathBuf>,
        error: MaterializeError,
    ) -> Self {
        Self {
            index,
            path: path.into(),
            destination,
            outcome: MaterializeOutcome::Failed(error),
            warning: None,
        }
    }

    /// Attach a warning.
    pub fn with_warning(mut self, warning: TransferWarning) -> Self {
        self.warning = Some(warning);
        self
    }

    /// Whether the file completed.
    pub fn is_completed(&self) -> bool {
        self.outcome.is_completed()
    }

    /// The error, for failed files.
    pub fn error(&self) -> Option<&MaterializeError> {
        self.outcome.error()
    }
}

/// Result of a whole run, one report per manifest file in manifest order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    /// Whether the run was cancelled before every file finished.
    pub cancelled: bool,
}

impl RunReport {
    /// Number of completed files.
    pub fn completed_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_completed()).count()
    }

    /// Number of failed files.
    pub fn failed_count(&self) -> usize {
        self.files.len() - self.completed_count()
    }

    /// Whether every file completed.
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Reports of failed files.
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.is_completed())
    }

    /// Manifest indices of failed files.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures().map(|f| f.index).collect()
    }

    /// Total bytes written by completed files.
    pub fn bytes_written(&self) -> u64 {
        self.files
            .iter()
            .filter_map(|f| f.outcome.bytes_written())
            .sum()
    }

    /// Completed files that carry a warning.
    pub fn warnings(&self) -> impl Iterator<Item = (&FileReport, &TransferWarning)> {
        self.files
            .iter()
            .filter_map(|f| f.warning.as_ref().map(|w| (f, w)))
    }
}

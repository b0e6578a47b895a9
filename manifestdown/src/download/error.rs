//! Error types for file materialization and runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::path::PathError;
use crate::provider::SourceError;

/// Errors that fail a single file.
///
/// Every variant names the manifest path of the file it belongs to, so each
/// failure can be reported on its own.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The manifest path would resolve outside the output root.
    #[error("{file}: unsafe output path: {reason}")]
    InvalidPath { file: String, reason: PathError },

    /// Creating the destination's parent directory failed.
    #[error("{file}: failed to create directory {}: {source}", .dir.display())]
    CreateDir {
        file: String,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The byte source could not be opened.
    #[error("{file}: failed to open byte source: {source}")]
    SourceOpen {
        file: String,
        #[source]
        source: SourceError,
    },

    /// Reading the byte source failed part-way.
    #[error("{file}: failed to read byte source after {offset} bytes: {source}")]
    SourceRead {
        file: String,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Another writer holds the destination file.
    #[error("{file}: destination {} is locked by another writer", .path.display())]
    DestinationBusy { file: String, path: PathBuf },

    /// The destination file could not be opened.
    #[error("{file}: failed to open destination {}: {source}", .path.display())]
    OpenDestination {
        file: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing the destination file failed.
    #[error("{file}: failed to write {}: {source}", .path.display())]
    Write {
        file: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stream length differs from the declared length.
    #[error("{file}: transferred {actual} bytes, expected {expected}")]
    IncompleteTransfer {
        file: String,
        expected: u64,
        actual: u64,
    },

    /// The written bytes do not match the manifest digest.
    #[error("{file}: checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// The run was cancelled before the file finished.
    #[error("{file}: cancelled")]
    Cancelled { file: String },

    /// The task materializing the file ended abnormally.
    #[error("{file}: task aborted: {reason}")]
    TaskAborted { file: String, reason: String },
}

/// Broad classification of a [`MaterializeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The manifest path was rejected.
    InvalidPath,
    /// Opening or reading the byte source failed.
    SourceRetrieval,
    /// Creating, opening or writing the destination failed.
    DestinationIo,
    /// Fewer or more bytes than declared.
    IncompleteTransfer,
    /// The content digest did not match.
    Integrity,
    /// The run was cancelled.
    Cancelled,
    /// The unit's task ended abnormally.
    Internal,
}

impl MaterializeError {
    /// Manifest path of the failed file.
    pub fn file(&self) -> &str {
        match self {
            Self::InvalidPath { file, .. }
            | Self::CreateDir { file, .. }
            | Self::SourceOpen { file, .. }
            | Self::SourceRead { file, .. }
            | Self::DestinationBusy { file, .. }
            | Self::OpenDestination { file, .. }
            | Self::Write { file, .. }
            | Self::IncompleteTransfer { file, .. }
            | Self::ChecksumMismatch { file, .. }
            | Self::Cancelled { file }
            | Self::TaskAborted { file, .. } => file,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::SourceOpen { .. } | Self::SourceRead { .. } => ErrorKind::SourceRetrieval,
            Self::CreateDir { .. }
            | Self::DestinationBusy { .. }
            | Self::OpenDestination { .. }
            | Self::Write { .. } => ErrorKind::DestinationIo,
            Self::IncompleteTransfer { .. } => ErrorKind::IncompleteTransfer,
            Self::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::TaskAborted { .. } => ErrorKind::Internal,
        }
    }
}

/// Non-fatal findings attached to a completed file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferWarning {
    /// The stream ended at a different length than declared.
    #[error("transferred {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Errors that stop a run before any file is materialized.
#[derive(Debug, Error)]
pub enum RunError {
    /// The output root exists but is not a directory.
    #[error("output root {} is not a directory", .0.display())]
    OutputRootNotDirectory(PathBuf),

    /// The output root could not be created.
    #[error("failed to create output root {}: {source}", .path.display())]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A report refers to a file the manifest does not have.
    #[error("file index {index} is out of range for a manifest of {files} files")]
    UnknownFile { index: usize, files: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_file() {
        let err = MaterializeError::SourceRead {
            file: "a/b.txt".to_string(),
            offset: 4,
            source: io::Error::other("chunk fetch failed"),
        };
        assert_eq!(err.file(), "a/b.txt");
        assert_eq!(err.kind(), ErrorKind::SourceRetrieval);
        let msg = err.to_string();
        assert!(msg.starts_with("a/b.txt:"));
        assert!(msg.contains("after 4 bytes"));
        assert!(msg.contains("chunk fetch failed"));
    }

    #[test]
    fn test_error_kinds() {
        let busy = MaterializeError::DestinationBusy {
            file: "x".to_string(),
            path: PathBuf::from("/out/x"),
        };
        assert_eq!(busy.kind(), ErrorKind::DestinationIo);

        let short = MaterializeError::IncompleteTransfer {
            file: "x".to_string(),
            expected: 10,
            actual: 4,
        };
        assert_eq!(short.kind(), ErrorKind::IncompleteTransfer);
        assert_eq!(short.to_string(), "x: transferred 4 bytes, expected 10");

        let invalid = MaterializeError::InvalidPath {
            file: "../x".to_string(),
            reason: PathError::ParentTraversal,
        };
        assert_eq!(invalid.kind(), ErrorKind::InvalidPath);
        assert!(invalid.to_string().contains("parent traversal"));
    }

    #[test]
    fn test_run_error_display() {
        let err = RunError::OutputRootNotDirectory(PathBuf::from("/tmp/file"));
        assert!(err.to_string().contains("not a directory"));
    }
}

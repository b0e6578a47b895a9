//! Error types for manifest decoding and byte source retrieval.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding a manifest.
///
/// These are fatal to a run: nothing can be materialized without a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest bytes could not be parsed.
    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// The manifest parsed but uses a layout this decoder does not support.
    #[error("unsupported manifest: {0}")]
    Unsupported(String),

    /// A file references a chunk that cannot be addressed safely.
    #[error("invalid chunk reference {chunk:?} in {file}: {reason}")]
    InvalidChunk {
        file: String,
        chunk: String,
        reason: String,
    },

    /// A file's parts add up to more than a `u64` can hold.
    #[error("file {0} declares a length that overflows")]
    LengthOverflow(String),
}

/// Errors raised while opening or reading a file's byte source.
///
/// Scoped to one file: the engine reports the file as failed and moves on.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A chunk request failed before a response arrived.
    #[error("failed to fetch chunk {chunk}: {reason}")]
    ChunkFetch { chunk: String, reason: String },

    /// The chunk store answered with a non-success status.
    #[error("chunk {chunk} returned HTTP {status}")]
    ChunkStatus { chunk: String, status: u16 },

    /// A chunk is shorter than the part that references it.
    #[error("chunk {chunk} is {actual} bytes, part needs {needed}")]
    ChunkTooShort {
        chunk: String,
        actual: usize,
        needed: u64,
    },

    /// Reading the local chunk cache failed.
    #[error("chunk cache I/O error at {}: {source}", .path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source could not be provided at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl From<SourceError> for io::Error {
    fn from(err: SourceError) -> Self {
        io::Error::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_display() {
        let err = ManifestError::InvalidChunk {
            file: "a/b.txt".to_string(),
            chunk: "../x".to_string(),
            reason: "parent traversal".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a/b.txt"));
        assert!(msg.contains("\"../x\""));
        assert!(msg.contains("parent traversal"));
    }

    #[test]
    fn test_source_error_into_io_error_keeps_message() {
        let err = SourceError::ChunkStatus {
            chunk: "ChunksV4/00/AB.chunk".to_string(),
            status: 404,
        };
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::Other);
        assert!(io_err.to_string().contains("HTTP 404"));
    }
}

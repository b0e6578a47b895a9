//! Manifest and byte source provider abstraction.
//!
//! The download engine never decodes manifests or touches chunks itself. It
//! consumes the types in this module:
//!
//! - [`ManifestDecoder`] turns raw manifest bytes into a [`ManifestHandle`]
//! - [`ManifestHandle`] exposes build metadata and an ordered list of
//!   [`FileEntry`] values
//! - [`FileEntry::open_stream`] yields a [`ByteSource`], a lazy, sequential,
//!   length-known reader over the file's reconstructed bytes
//!
//! Two providers ship with the crate:
//!
//! - [`memory`]: in-memory sources with fault injection, for tests and embedders
//! - [`json`]: a JSON chunk manifest whose parts are fetched over HTTP and
//!   optionally cached on disk
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use manifestdown::provider::{JsonManifestDecoder, ManifestDecoder, ManifestOptions, ReqwestClient};
//!
//! let decoder = JsonManifestDecoder::new(Arc::new(ReqwestClient::new()?));
//! let options = ManifestOptions::new("https://cdn.example.com/CloudDir/");
//! let manifest = decoder.decode(&raw, &options)?;
//!
//! for file in manifest.files() {
//!     println!("{} ({} bytes)", file.relative_path(), file.length());
//! }
//! ```

mod chunks;
mod error;
mod http;
pub mod json;
pub mod memory;

pub use chunks::{CachedChunkStore, ChunkPart, ChunkStore, ChunkedSource};
pub use error::{ManifestError, SourceError};
pub use http::{HttpChunkStore, HttpClient, HttpFailure, ReqwestClient};
pub use json::JsonManifestDecoder;

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Options handed to a [`ManifestDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestOptions {
    /// Base address chunks are fetched from. Always ends with `/`.
    pub chunk_base_url: String,
    /// Local chunk cache directory. `None` disables caching.
    pub chunk_cache_dir: Option<PathBuf>,
}

impl ManifestOptions {
    /// Create options for the given chunk base address, without caching.
    pub fn new(chunk_base_url: impl Into<String>) -> Self {
        let mut chunk_base_url = chunk_base_url.into();
        if !chunk_base_url.ends_with('/') {
            chunk_base_url.push('/');
        }
        Self {
            chunk_base_url,
            chunk_cache_dir: None,
        }
    }

    /// Enable the on-disk chunk cache.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.chunk_cache_dir = Some(dir);
        self
    }
}

/// Decodes raw manifest bytes into a [`ManifestHandle`].
pub trait ManifestDecoder: Send + Sync {
    /// Decode `raw` using `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the bytes are malformed or unsupported.
    /// This is fatal for a run: no file can be resolved.
    fn decode(&self, raw: &[u8], options: &ManifestOptions) -> Result<ManifestHandle, ManifestError>;
}

/// Opens fresh byte sources for one logical file.
///
/// Every call to [`open`](Self::open) must return an independent reader
/// positioned at offset zero.
pub trait ByteSourceFactory: Send + Sync {
    /// Open a new byte source.
    fn open(&self) -> BoxFuture<'_, Result<ByteSource, SourceError>>;
}

/// A scoped, sequential, forward-only reader with a known total length.
///
/// Read errors raised by the provider surface as `io::Error` values, usually
/// wrapping a [`SourceError`].
pub struct ByteSource {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    length: u64,
}

impl ByteSource {
    /// Wrap a reader that yields exactly `length` bytes.
    pub fn new<R>(reader: R, length: u64) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            length,
        }
    }

    /// Declared total length of the stream.
    pub fn length(&self) -> u64 {
        self.length
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for ByteSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().reader.as_mut().poll_read(cx, buf)
    }
}

/// One logical output file described by a manifest.
#[derive(Clone)]
pub struct FileEntry {
    relative_path: String,
    length: u64,
    sha256: Option<String>,
    source: Arc<dyn ByteSourceFactory>,
}

impl FileEntry {
    /// Create a file entry.
    ///
    /// `relative_path` uses the manifest's separator convention (`/` or `\`);
    /// it is normalized and checked when the file is materialized.
    pub fn new(
        relative_path: impl Into<String>,
        length: u64,
        source: Arc<dyn ByteSourceFactory>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            length,
            sha256: None,
            source,
        }
    }

    /// Attach an expected SHA-256 digest (hex).
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }

    /// Path relative to the output root, as written in the manifest.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Declared total length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Expected SHA-256 digest (lowercase hex), if the manifest carries one.
    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    /// Open a fresh byte source for this file.
    pub fn open_stream(&self) -> BoxFuture<'_, Result<ByteSource, SourceError>> {
        self.source.open()
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("relative_path", &self.relative_path)
            .field("length", &self.length)
            .field("sha256", &self.sha256)
            .finish_non_exhaustive()
    }
}

/// Decoded manifest: build metadata plus the ordered file list.
#[derive(Debug, Clone, Default)]
pub struct ManifestHandle {
    app_name: String,
    build_version: String,
    launch_command: String,
    files: Vec<FileEntry>,
}

impl ManifestHandle {
    /// Create a manifest handle.
    pub fn new(
        app_name: impl Into<String>,
        build_version: impl Into<String>,
        launch_command: impl Into<String>,
        files: Vec<FileEntry>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            build_version: build_version.into(),
            launch_command: launch_command.into(),
            files,
        }
    }

    /// Application name (informational).
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Build version string (informational).
    pub fn build_version(&self) -> &str {
        &self.build_version
    }

    /// Launch command (informational).
    pub fn launch_command(&self) -> &str {
        &self.launch_command
    }

    /// Files in manifest order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Sum of all declared file lengths.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(FileEntry::length).sum()
    }

    /// Whether the manifest lists no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemorySource;

    #[test]
    fn test_manifest_options_appends_slash() {
        let options = ManifestOptions::new("https://cdn.example.com/CloudDir");
        assert_eq!(options.chunk_base_url, "https://cdn.example.com/CloudDir/");
        assert!(options.chunk_cache_dir.is_none());

        let options = ManifestOptions::new("https://cdn.example.com/CloudDir/");
        assert_eq!(options.chunk_base_url, "https://cdn.example.com/CloudDir/");
    }

    #[test]
    fn test_manifest_total_bytes() {
        let files = vec![
            memory::entry("a/b.txt", MemorySource::new(vec![1u8; 10])),
            memory::entry("c.txt", MemorySource::new(Vec::new())),
            memory::entry("d.bin", MemorySource::new(vec![0u8; 32])),
        ];
        let manifest = ManifestHandle::new("App", "1.0", "App.exe", files);

        assert_eq!(manifest.files().len(), 3);
        assert_eq!(manifest.total_bytes(), 42);
        assert!(!manifest.is_empty());
        assert_eq!(manifest.app_name(), "App");
        assert_eq!(manifest.build_version(), "1.0");
        assert_eq!(manifest.launch_command(), "App.exe");
    }

    #[test]
    fn test_file_entry_sha256_is_lowercased() {
        let entry = memory::entry("x", MemorySource::new(vec![1u8])).with_sha256("ABCDEF");
        assert_eq!(entry.sha256(), Some("abcdef"));
    }

    #[tokio::test]
    async fn test_open_stream_returns_fresh_sources() {
        use tokio::io::AsyncReadExt;

        let entry = memory::entry("x", MemorySource::new(b"hello".to_vec()));

        for _ in 0..2 {
            let mut source = entry.open_stream().await.unwrap();
            assert_eq!(source.length(), 5);
            let mut out = Vec::new();
            source.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"hello");
        }
    }
}

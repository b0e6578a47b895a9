//! Chunk-backed byte sources and the on-disk chunk cache.
//!
//! A file is a sequence of [`ChunkPart`]s, each a slice of one chunk. The
//! [`ChunkedSource`] factory turns those parts into a lazy reader: a chunk
//! is fetched only when the reader reaches its part.
//!
//! ```text
//! ChunkedSource ──open──► ByteSource (StreamReader)
//!                              │ one fetch per part, in order
//!                              ▼
//!                        CachedChunkStore ──miss──► HttpChunkStore
//!                              │ hit
//!                              ▼
//!                        <cache_dir>/<xx>/<sha256 of chunk id>
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::{BoxFuture, ByteSource, ByteSourceFactory, SourceError};

/// Source of raw chunk bytes, addressed by chunk id.
pub trait ChunkStore: Send + Sync {
    /// Fetch the complete chunk `chunk`.
    fn fetch<'a>(&'a self, chunk: &'a str) -> BoxFuture<'a, Result<Bytes, SourceError>>;
}

/// A slice `[offset, offset + size)` of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPart {
    /// Chunk id, resolved by the [`ChunkStore`].
    pub chunk: String,
    /// Offset of the slice inside the chunk.
    pub offset: u64,
    /// Length of the slice.
    pub size: u64,
}

impl ChunkPart {
    /// Create a chunk part.
    pub fn new(chunk: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            chunk: chunk.into(),
            offset,
            size,
        }
    }

    /// Cut this part out of a fetched chunk.
    fn slice(&self, data: Bytes) -> Result<Bytes, SourceError> {
        let too_short = || SourceError::ChunkTooShort {
            chunk: self.chunk.clone(),
            actual: data.len(),
            needed: self.offset.saturating_add(self.size),
        };

        let start = usize::try_from(self.offset).map_err(|_| too_short())?;
        let size = usize::try_from(self.size).map_err(|_| too_short())?;
        let end = start.checked_add(size).ok_or_else(too_short)?;
        if end > data.len() {
            return Err(too_short());
        }
        Ok(data.slice(start..end))
    }
}

/// Byte source factory that assembles a file from chunk parts.
#[derive(Clone)]
pub struct ChunkedSource {
    store: Arc<dyn ChunkStore>,
    parts: Arc<Vec<ChunkPart>>,
    length: u64,
}

impl ChunkedSource {
    /// Create a factory over `parts`. The length is the sum of part sizes.
    pub fn new(store: Arc<dyn ChunkStore>, parts: Vec<ChunkPart>) -> Self {
        let length = parts.iter().map(|p| p.size).sum();
        Self {
            store,
            parts: Arc::new(parts),
            length,
        }
    }

    /// Total length of the assembled file.
    pub fn length(&self) -> u64 {
        self.length
    }
}

impl ByteSourceFactory for ChunkedSource {
    fn open(&self) -> BoxFuture<'_, Result<ByteSource, SourceError>> {
        let store = Arc::clone(&self.store);
        let parts = Arc::clone(&self.parts);
        let length = self.length;

        Box::pin(async move {
            let non_empty: Vec<usize> = (0..parts.len()).filter(|&i| parts[i].size > 0).collect();
            let chunks = stream::iter(non_empty).then(move |i| {
                let store = Arc::clone(&store);
                let part = parts[i].clone();
                async move {
                    let data = store.fetch(&part.chunk).await?;
                    part.slice(data).map_err(io::Error::from)
                }
            });

            Ok(ByteSource::new(StreamReader::new(Box::pin(chunks)), length))
        })
    }
}

/// Distinguishes temporary cache files written concurrently by this process.
static CACHE_WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Chunk store decorator that keeps fetched chunks on disk.
///
/// Each chunk is stored under the hex SHA-256 of its id, fanned out by the
/// first two digits, so distinct ids never share a cache file.
///
/// Cache writes go to a temporary file that is renamed into place, so a
/// reader never observes a partially written chunk. Failing to write the
/// cache is logged and otherwise ignored.
pub struct CachedChunkStore {
    inner: Arc<dyn ChunkStore>,
    cache_dir: PathBuf,
}

impl CachedChunkStore {
    /// Wrap `inner` with a cache rooted at `cache_dir`.
    pub fn new(inner: Arc<dyn ChunkStore>, cache_dir: PathBuf) -> Self {
        Self { inner, cache_dir }
    }

    /// Cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Location of a chunk inside the cache.
    pub fn cache_path(&self, chunk: &str) -> PathBuf {
        let key = format!("{:x}", Sha256::digest(chunk.as_bytes()));
        self.cache_dir.join(&key[..2]).join(key)
    }

    async fn store(&self, path: &Path, data: &Bytes) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let seq = CACHE_WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e);
        }
        Ok(())
    }
}

impl ChunkStore for CachedChunkStore {
    fn fetch<'a>(&'a self, chunk: &'a str) -> BoxFuture<'a, Result<Bytes, SourceError>> {
        Box::pin(async move {
            let path = self.cache_path(chunk);

            match tokio::fs::read(&path).await {
                Ok(data) => {
                    debug!(chunk, path = %path.display(), "Chunk cache hit");
                    return Ok(Bytes::from(data));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(SourceError::Cache { path, source }),
            }

            let data = self.inner.fetch(chunk).await?;

            if let Err(e) = self.store(&path, &data).await {
                warn!(chunk, path = %path.display(), error = %e, "Failed to cache chunk");
            }

            Ok(data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::AsyncReadExt;

    /// Chunk store backed by a map, counting fetches.
    #[derive(Default)]
    struct MapStore {
        chunks: HashMap<String, Bytes>,
        fetches: AtomicUsize,
    }

    impl MapStore {
        fn with(mut self, id: &str, data: &'static [u8]) -> Self {
            self.chunks.insert(id.to_string(), Bytes::from_static(data));
            self
        }
    }

    impl ChunkStore for MapStore {
        fn fetch<'a>(&'a self, chunk: &'a str) -> BoxFuture<'a, Result<Bytes, SourceError>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let result = self
                .chunks
                .get(chunk)
                .cloned()
                .ok_or_else(|| SourceError::ChunkStatus {
                    chunk: chunk.to_string(),
                    status: 404,
                });
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn test_chunked_source_assembles_parts_in_order() {
        let store = Arc::new(
            MapStore::default()
                .with("a", b"0123456789")
                .with("b", b"abcdef"),
        );
        let source = ChunkedSource::new(
            store,
            vec![
                ChunkPart::new("b", 2, 3),
                ChunkPart::new("a", 0, 4),
                ChunkPart::new("a", 8, 0),
                ChunkPart::new("a", 8, 2),
            ],
        );
        assert_eq!(source.length(), 9);

        let mut reader = source.open().await.unwrap();
        assert_eq!(reader.length(), 9);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"cde012389");
    }

    #[tokio::test]
    async fn test_chunked_source_is_lazy() {
        let store = Arc::new(MapStore::default().with("a", b"xyz"));
        let source = ChunkedSource::new(
            Arc::clone(&store) as Arc<dyn ChunkStore>,
            vec![ChunkPart::new("a", 0, 3)],
        );

        let _reader = source.open().await.unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chunked_source_short_chunk_fails_read() {
        let store = Arc::new(MapStore::default().with("a", b"xyz"));
        let source = ChunkedSource::new(store, vec![ChunkPart::new("a", 1, 5)]);

        let mut reader = source.open().await.unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("needs 6"));
    }

    #[tokio::test]
    async fn test_chunked_source_missing_chunk_fails_mid_stream() {
        let store = Arc::new(MapStore::default().with("a", b"abcd"));
        let source = ChunkedSource::new(
            store,
            vec![ChunkPart::new("a", 0, 4), ChunkPart::new("gone", 0, 4)],
        );

        let mut reader = source.open().await.unwrap();
        let mut first = [0u8; 4];
        reader.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abcd");

        let mut rest = Vec::new();
        let err = reader.read_to_end(&mut rest).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_cached_store_populates_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(MapStore::default().with("ChunksV4/00/AB.chunk", b"payload"));
        let cache = CachedChunkStore::new(
            Arc::clone(&inner) as Arc<dyn ChunkStore>,
            dir.path().join("chunks"),
        );

        let first = cache.fetch("ChunksV4/00/AB.chunk").await.unwrap();
        let second = cache.fetch("ChunksV4/00/AB.chunk").await.unwrap();

        assert_eq!(&first[..], b"payload");
        assert_eq!(first, second);
        assert_eq!(inner.fetches.load(Ordering::SeqCst), 1);

        let cached = cache.cache_path("ChunksV4/00/AB.chunk");
        assert!(cached.starts_with(dir.path().join("chunks")));
        assert_eq!(std::fs::read(cached).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_cached_store_keeps_similar_ids_apart() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(
            MapStore::default()
                .with("x/a.chunk", b"AAAAA")
                .with("x_a.chunk", b"BBBBB")
                .with("x\\a.chunk", b"CCCCC"),
        );
        let cache = CachedChunkStore::new(
            Arc::clone(&inner) as Arc<dyn ChunkStore>,
            dir.path().to_path_buf(),
        );

        assert_ne!(cache.cache_path("x/a.chunk"), cache.cache_path("x_a.chunk"));
        assert_ne!(cache.cache_path("x/a.chunk"), cache.cache_path("x\\a.chunk"));

        for _ in 0..2 {
            assert_eq!(&cache.fetch("x/a.chunk").await.unwrap()[..], b"AAAAA");
            assert_eq!(&cache.fetch("x_a.chunk").await.unwrap()[..], b"BBBBB");
            assert_eq!(&cache.fetch("x\\a.chunk").await.unwrap()[..], b"CCCCC");
        }
        assert_eq!(inner.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cached_store_does_not_cache_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CachedChunkStore::new(Arc::new(MapStore::default()), dir.path().to_path_buf());

        assert!(cache.fetch("missing").await.is_err());
        assert!(!cache.cache_path("missing").exists());
    }
}

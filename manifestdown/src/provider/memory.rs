//! In-memory byte sources.
//!
//! [`MemorySource`] serves a fixed buffer and can inject the failures a real
//! chunk provider produces: a failed open, a read error part-way through the
//! stream, or a declared length that disagrees with the data.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

use super::{BoxFuture, ByteSource, ByteSourceFactory, FileEntry, SourceError};

/// Byte source factory over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    declared_length: Option<u64>,
    fail_after: Option<usize>,
    fail_on_open: bool,
    max_read: Option<usize>,
}

impl MemorySource {
    /// Serve `data` in full.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            declared_length: None,
            fail_after: None,
            fail_on_open: false,
            max_read: None,
        }
    }

    /// Deliver at most `bytes` bytes, then fail the next read.
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    /// Fail when the source is opened.
    pub fn fail_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    /// Report `length` as the stream length instead of the buffer length.
    pub fn declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Cap each read at `bytes`, to exercise many small reads.
    pub fn max_read(mut self, bytes: usize) -> Self {
        self.max_read = Some(bytes.max(1));
        self
    }

    /// Length reported to readers.
    pub fn length(&self) -> u64 {
        self.declared_length.unwrap_or(self.data.len() as u64)
    }
}

impl ByteSourceFactory for MemorySource {
    fn open(&self) -> BoxFuture<'_, Result<ByteSource, SourceError>> {
        Box::pin(async move {
            if self.fail_on_open {
                return Err(SourceError::Unavailable("injected open failure".to_string()));
            }

            let reader = MemoryReader {
                data: self.data.clone(),
                position: 0,
                fail_after: self.fail_after,
                max_read: self.max_read,
            };
            Ok(ByteSource::new(reader, self.length()))
        })
    }
}

struct MemoryReader {
    data: Bytes,
    position: usize,
    fail_after: Option<usize>,
    max_read: Option<usize>,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let limit = this
            .fail_after
            .map_or(this.data.len(), |n| n.min(this.data.len()));

        if this.position >= limit {
            if let Some(n) = this.fail_after {
                let err = SourceError::Unavailable(format!("injected read failure after {} bytes", n));
                return Poll::Ready(Err(err.into()));
            }
            return Poll::Ready(Ok(()));
        }

        let mut n = (limit - this.position).min(buf.remaining());
        if let Some(max) = this.max_read {
            n = n.min(max);
        }
        buf.put_slice(&this.data[this.position..this.position + n]);
        this.position += n;
        Poll::Ready(Ok(()))
    }
}

/// Build a [`FileEntry`] backed by `source`, declaring the source's length.
pub fn entry(relative_path: impl Into<String>, source: MemorySource) -> FileEntry {
    let length = source.length();
    FileEntry::new(relative_path, length, Arc::new(source))
}

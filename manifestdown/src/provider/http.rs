//! HTTP client abstraction and the HTTP chunk store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::chunks::ChunkStore;
use super::{BoxFuture, SourceError};

/// Default timeout for a single HTTP request.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors from an [`HttpClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpFailure {
    /// The client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// The request failed before a response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("HTTP {0}")]
    Status(u16),
}

/// Trait for HTTP GET operations.
///
/// This abstraction allows mock clients in tests.
pub trait HttpClient: Send + Sync {
    /// Fetch the full body at `url`.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, HttpFailure>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new client with the default timeout.
    pub fn new() -> Result<Self, HttpFailure> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a new client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpFailure::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, HttpFailure>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| HttpFailure::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(HttpFailure::Status(status.as_u16()));
            }

            response
                .bytes()
                .await
                .map_err(|e| HttpFailure::Request(format!("failed to read body: {}", e)))
        })
    }
}

/// Chunk store that fetches `base_url + chunk` over HTTP.
#[derive(Clone)]
pub struct HttpChunkStore {
    client: Arc<dyn HttpClient>,
    base_url: String,
}

impl HttpChunkStore {
    /// Create a store rooted at `base_url` (a trailing `/` is added if missing).
    pub fn new(client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { client, base_url }
    }

    /// Base address chunks are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a chunk.
    pub fn chunk_url(&self, chunk: &str) -> String {
        format!("{}{}", self.base_url, chunk.trim_start_matches('/'))
    }
}

impl ChunkStore for HttpChunkStore {
    fn fetch<'a>(&'a self, chunk: &'a str) -> BoxFuture<'a, Result<Bytes, SourceError>> {
        Box::pin(async move {
            let url = self.chunk_url(chunk);
            debug!(chunk, url = %url, "Fetching chunk");

            self.client.get(&url).await.map_err(|failure| match failure {
                HttpFailure::Status(status) => SourceError::ChunkStatus {
                    chunk: chunk.to_string(),
                    status,
                },
                other => SourceError::ChunkFetch {
                    chunk: chunk.to_string(),
                    reason: other.to_string(),
                },
            })
        })
    }
}

//! JSON chunk manifest decoder.
//!
//! # Format
//!
//! ```json
//! {
//!   "AppName": "Fortnite",
//!   "BuildVersion": "++Fortnite+Release-30.00-CL-1234",
//!   "LaunchCommand": "FortniteGame/Binaries/Win64/FortniteLauncher.exe",
//!   "Files": [
//!     {
//!       "Path": "FortniteGame/Content/Paks/global.ucas",
//!       "Sha256": "9f86d081884c7d65...",
//!       "Parts": [
//!         { "Chunk": "ChunksV4/12/0A1B2C3D_4E5F.chunk", "Offset": 0, "Size": 1048576 }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! A file's length is the sum of its part sizes. Chunk ids are resolved
//! against [`ManifestOptions::chunk_base_url`]; when a cache directory is set
//! every chunk goes through a [`CachedChunkStore`].

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::chunks::{CachedChunkStore, ChunkPart, ChunkStore, ChunkedSource};
use super::http::{HttpChunkStore, HttpClient};
use super::{FileEntry, ManifestDecoder, ManifestError, ManifestHandle, ManifestOptions};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawManifest {
    #[serde(default)]
    app_name: String,
    #[serde(default)]
    build_version: String,
    #[serde(default)]
    launch_command: String,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFile {
    path: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPart {
    chunk: String,
    #[serde(default)]
    offset: u64,
    size: u64,
}

/// Decoder for JSON chunk manifests.
pub struct JsonManifestDecoder {
    client: Arc<dyn HttpClient>,
}

impl JsonManifestDecoder {
    /// Create a decoder whose chunk stores fetch through `client`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    fn chunk_store(&self, options: &ManifestOptions) -> Arc<dyn ChunkStore> {
        let http: Arc<dyn ChunkStore> = Arc::new(HttpChunkStore::new(
            Arc::clone(&self.client),
            options.chunk_base_url.clone(),
        ));

        match &options.chunk_cache_dir {
            Some(dir) => Arc::new(CachedChunkStore::new(http, dir.clone())),
            None => http,
        }
    }
}

/// Reject chunk ids that could escape the base address or the cache directory.
fn validate_chunk_id(file: &str, chunk: &str) -> Result<(), ManifestError> {
    let invalid = |reason: &str| ManifestError::InvalidChunk {
        file: file.to_string(),
        chunk: chunk.to_string(),
        reason: reason.to_string(),
    };

    if chunk.is_empty() {
        return Err(invalid("empty chunk id"));
    }
    if chunk.contains("://") {
        return Err(invalid("absolute URL"));
    }
    if chunk.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(invalid("parent traversal"));
    }
    if chunk
        .split(['/', '\\'])
        .all(|segment| segment.is_empty() || segment == ".")
    {
        return Err(invalid("no chunk name"));
    }
    if !chunk
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '\\' | '_' | '-' | '.'))
    {
        return Err(invalid("unexpected character"));
    }
    Ok(())
}

impl ManifestDecoder for JsonManifestDecoder {
    fn decode(&self, raw: &[u8], options: &ManifestOptions) -> Result<ManifestHandle, ManifestError> {
        let manifest: RawManifest =
            serde_json::from_slice(raw).map_err(|e| ManifestError::Malformed(e.to_string()))?;

        let store = self.chunk_store(options);
        let mut files = Vec::with_capacity(manifest.files.len());

        for file in manifest.files {
            let mut parts = Vec::with_capacity(file.parts.len());
            let mut length: u64 = 0;
            for part in file.parts {
                validate_chunk_id(&file.path, &part.chunk)?;
                length = length
                    .checked_add(part.size)
                    .ok_or_else(|| ManifestError::LengthOverflow(file.path.clone()))?;
                parts.push(ChunkPart::new(part.chunk, part.offset, part.size));
            }

            let source = ChunkedSource::new(Arc::clone(&store), parts);
            let mut entry = FileEntry::new(file.path, length, Arc::new(source));
            if let Some(digest) = file.sha256.filter(|d| !d.is_empty()) {
                entry = entry.with_sha256(digest);
            }
            files.push(entry);
        }

        debug!(
            app = %manifest.app_name,
            version = %manifest.build_version,
            files = files.len(),
            "Decoded JSON manifest"
        );

        Ok(ManifestHandle::new(
            manifest.app_name,
            manifest.build_version,
            manifest.launch_command,
            files,
        ))
    }
}

//! ManifestDown - parallel manifest-driven file materialization
//!
//! This library takes a decoded build manifest, whose files are backed by
//! lazily reassembled byte streams, and writes every file under an output
//! directory with bounded concurrency, byte-level progress and per-file
//! failure isolation.
//!
//! - [`provider`]: manifest decoding and byte sources
//! - [`download`]: materializer, progress model and orchestrator
//! - [`config`]: run configuration and the user config file
//! - [`logging`]: subscriber setup for front ends

pub mod config;
pub mod download;
pub mod logging;
pub mod provider;

pub use config::{LengthPolicy, RunConfig};
pub use download::{ManifestDownloader, RunObserver, RunReport};
pub use provider::{FileEntry, ManifestHandle};

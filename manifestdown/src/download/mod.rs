//! Parallel file materialization.
//!
//! This module turns a decoded [`ManifestHandle`](crate::provider::ManifestHandle)
//! into files on disk:
//!
//! - [`ManifestDownloader`] dispatches one unit per file under a concurrency
//!   bound and collects a [`RunReport`]
//! - [`Materializer`] copies one file's byte source to its destination
//! - [`ProgressBoard`] and [`ProgressUnit`] expose byte-level progress
//! - [`RunObserver`] receives lifecycle events for front ends
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use manifestdown::config::RunConfig;
//! use manifestdown::download::{ManifestDownloader, TracingObserver};
//!
//! let downloader = ManifestDownloader::new(RunConfig::new("/games/build").with_concurrency(8));
//! let report = downloader.run(&manifest, Arc::new(TracingObserver)).await?;
//! println!("{} completed, {} failed", report.completed_count(), report.failed_count());
//! ```

mod error;
mod materializer;
mod observer;
mod orchestrator;
pub mod path;
mod progress;
mod report;

pub use error::{ErrorKind, MaterializeError, RunError, TransferWarning};
pub use materializer::Materializer;
pub use observer::{NoopObserver, RunObserver, TracingObserver};
pub use orchestrator::ManifestDownloader;
pub use path::{normalize_relative_path, resolve_destination, PathError};
pub use progress::{
    BoardCallback, BoardTotals, ProgressBoard, ProgressReporter, ProgressSnapshot, ProgressUnit,
    UnitState,
};
pub use report::{FileReport, MaterializeOutcome, RunReport};

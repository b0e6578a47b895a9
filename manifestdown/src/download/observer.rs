//! Run event sink.
//!
//! The engine never renders anything. Front ends implement [`RunObserver`]
//! and receive lifecycle events from every unit. Callbacks run on the task
//! that materializes the file, so implementations must be cheap and must not
//! block.

use tracing::{debug, info, warn};

use super::progress::ProgressUnit;
use super::report::{FileReport, RunReport};

/// Receives run and per-file events.
///
/// Every method has a no-op default.
pub trait RunObserver: Send + Sync {
    /// A run is about to dispatch `files` files totalling `total_bytes`.
    fn on_run_started(&self, files: usize, total_bytes: u64) {
        let _ = (files, total_bytes);
    }

    /// A unit opened its source and became active.
    fn on_file_started(&self, unit: &ProgressUnit) {
        let _ = unit;
    }

    /// A unit wrote another buffer.
    fn on_progress(&self, unit: &ProgressUnit) {
        let _ = unit;
    }

    /// A file completed.
    fn on_file_completed(&self, report: &FileReport) {
        let _ = report;
    }

    /// A file failed.
    fn on_file_failed(&self, report: &FileReport) {
        let _ = report;
    }

    /// Every unit reached a terminal state.
    fn on_run_finished(&self, report: &RunReport) {
        let _ = report;
    }
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Observer that turns run events into `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_run_started(&self, files: usize, total_bytes: u64) {
        info!(files, total_bytes, "Download started");
    }

    fn on_file_started(&self, unit: &ProgressUnit) {
        debug!(index = unit.index(), path = unit.path(), total = unit.total(), "File started");
    }

    fn on_file_completed(&self, report: &FileReport) {
        match &report.warning {
            Some(warning) => warn!(path = %report.path, %warning, "File completed with warning"),
            None => info!(
                path = %report.path,
                bytes = report.outcome.bytes_written().unwrap_or(0),
                "File completed"
            ),
        }
    }

    fn on_file_failed(&self, report: &FileReport) {
        if let Some(error) = report.error() {
            warn!(path = %report.path, kind = ?error.kind(), error = %error, "File failed");
        }
    }

    fn on_run_finished(&self, report: &RunReport) {
        info!(
            completed = report.completed_count(),
            failed = report.failed_count(),
            bytes = report.bytes_written(),
            cancelled = report.cancelled,
            "Download finished"
        );
    }
}

//! Progress model for per-file materialization.
//!
//! Each file gets a [`ProgressUnit`] holding atomic counters. Only the unit
//! materializing the file writes to it; observers read it at any time. The
//! [`ProgressBoard`] collects the units of a run, and the
//! [`ProgressReporter`] polls a board on an interval.
//!
//! ```text
//! Pending ──activate──► Active ──complete──► Completed
//!    │                    │
//!    └───────fail─────────┴─────fail───────► Failed
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a [`ProgressUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitState {
    /// Registered, not started.
    Pending = 0,
    /// Total known, bytes flowing.
    Active = 1,
    /// Finished successfully.
    Completed = 2,
    /// Finished with an error.
    Failed = 3,
}

impl UnitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => UnitState::Pending,
            1 => UnitState::Active,
            2 => UnitState::Completed,
            _ => UnitState::Failed,
        }
    }

    /// Whether no further change is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Completed | UnitState::Failed)
    }
}

/// Per-file progress counters.
///
/// `transferred` never decreases and never exceeds `total`.
#[derive(Debug)]
pub struct ProgressUnit {
    index: usize,
    path: String,
    total: AtomicU64,
    transferred: AtomicU64,
    state: AtomicU8,
    started_at: Mutex<Option<Instant>>,
    finished_at: Mutex<Option<Instant>>,
}

impl ProgressUnit {
    /// Create a pending unit for the file at manifest `index`.
    pub fn new(index: usize, path: impl Into<String>) -> Self {
        Self {
            index,
            path: path.into(),
            total: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
            state: AtomicU8::new(UnitState::Pending as u8),
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
        }
    }

    /// Manifest index of the file.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Manifest path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current state.
    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Total bytes expected.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    fn transition(&self, from: UnitState, to: UnitState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move from `Pending` to `Active` with a known total.
    ///
    /// Returns `false` if the unit was not pending.
    pub fn activate(&self, total: u64) -> bool {
        if self.state() != UnitState::Pending {
            return false;
        }
        self.total.store(total, Ordering::SeqCst);
        *self.started_at.lock() = Some(Instant::now());
        self.transition(UnitState::Pending, UnitState::Active)
    }

    /// Add `bytes` to the transferred count, saturating at the total.
    ///
    /// Ignored unless the unit is active. Returns the new transferred count.
    pub fn advance(&self, bytes: u64) -> u64 {
        if self.state() != UnitState::Active {
            return self.transferred();
        }
        let total = self.total();
        let previous = self
            .transferred
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(bytes).min(total))
            })
            .unwrap_or_else(|current| current);
        previous.saturating_add(bytes).min(total)
    }

    /// Mark the unit completed with the final byte count.
    ///
    /// Both counters are set to `final_bytes`, so a completed unit always
    /// reports `transferred == total`.
    pub fn complete(&self, final_bytes: u64) -> bool {
        if self.state() != UnitState::Active {
            return false;
        }
        let final_bytes = final_bytes.max(self.transferred());
        self.total.store(final_bytes, Ordering::SeqCst);
        self.transferred.store(final_bytes, Ordering::SeqCst);
        *self.finished_at.lock() = Some(Instant::now());
        self.transition(UnitState::Active, UnitState::Completed)
    }

    /// Mark the unit failed. Returns `false` if it was already terminal.
    pub fn fail(&self) -> bool {
        let failed = self.transition(UnitState::Active, UnitState::Failed)
            || self.transition(UnitState::Pending, UnitState::Failed);
        if failed {
            *self.finished_at.lock() = Some(Instant::now());
        }
        failed
    }

    /// Time spent active, up to now or to the terminal transition.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = (*self.started_at.lock())?;
        let end = (*self.finished_at.lock()).unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            index: self.index,
            path: self.path.clone(),
            state: self.state(),
            total: self.total(),
            transferred: self.transferred(),
            elapsed: self.elapsed(),
        }
    }
}

/// Point-in-time view of a [`ProgressUnit`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub index: usize,
    pub path: String,
    pub state: UnitState,
    pub total: u64,
    pub transferred: u64,
    pub elapsed: Option<Duration>,
}

impl ProgressSnapshot {
    /// Completion percentage (0.0 to 100.0).
    ///
    /// A zero-length file reads 100% once completed and 0% before.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            if self.state == UnitState::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.transferred as f64 / self.total as f64) * 100.0
        }
    }

    /// Average throughput since activation.
    pub fn throughput_bytes_per_sec(&self) -> Option<f64> {
        let secs = self.elapsed?.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(self.transferred as f64 / secs)
    }

    /// Estimated time remaining at the average throughput.
    pub fn eta(&self) -> Option<Duration> {
        if self.state != UnitState::Active {
            return None;
        }
        let rate = self.throughput_bytes_per_sec().filter(|r| *r > 0.0)?;
        let remaining = self.total.saturating_sub(self.transferred) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }
}

/// Aggregate counts over a board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardTotals {
    pub files: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes_total: u64,
    pub bytes_transferred: u64,
}

impl BoardTotals {
    /// Number of files in a terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// All progress units of a run, keyed by manifest index.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    units: DashMap<usize, Arc<ProgressUnit>>,
}

impl ProgressBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending unit, replacing any previous unit at `index`.
    pub fn register(&self, index: usize, path: impl Into<String>) -> Arc<ProgressUnit> {
        let unit = Arc::new(ProgressUnit::new(index, path));
        self.units.insert(index, Arc::clone(&unit));
        unit
    }

    /// Unit at `index`, if registered.
    pub fn get(&self, index: usize) -> Option<Arc<ProgressUnit>> {
        self.units.get(&index).map(|u| Arc::clone(u.value()))
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the board has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Snapshots of every unit, ordered by index.
    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        let mut snapshots: Vec<_> = self.units.iter().map(|u| u.value().snapshot()).collect();
        snapshots.sort_by_key(|s| s.index);
        snapshots
    }

    /// Snapshots of units that have not reached a terminal state.
    pub fn visible(&self) -> Vec<ProgressSnapshot> {
        self.snapshot()
            .into_iter()
            .filter(|s| !s.state.is_terminal())
            .collect()
    }

    /// Aggregate counts and bytes.
    pub fn totals(&self) -> BoardTotals {
        let mut totals = BoardTotals::default();
        for unit in self.units.iter() {
            let unit = unit.value();
            totals.files += 1;
            match unit.state() {
                UnitState::Pending => totals.pending += 1,
                UnitState::Active => totals.active += 1,
                UnitState::Completed => totals.completed += 1,
                UnitState::Failed => totals.failed += 1,
            }
            totals.bytes_total += unit.total();
            totals.bytes_transferred += unit.transferred();
        }
        totals
    }

    /// Remove every unit.
    pub fn clear(&self) {
        self.units.clear();
    }
}

/// Callback invoked by a [`ProgressReporter`] with aggregate totals.
pub type BoardCallback = Arc<dyn Fn(BoardTotals) + Send + Sync>;

/// Periodic progress reporter.
///
/// Spawns a background task that polls a board and invokes a callback with
/// the aggregate totals. The reporter sends one final report when stopped.
/// Must be started from within a tokio runtime.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    done: CancellationToken,
}

impl ProgressReporter {
    /// Start polling `board` every `poll_interval`.
    pub fn start(board: Arc<ProgressBoard>, callback: BoardCallback, poll_interval: Duration) -> Self {
        let done = CancellationToken::new();
        let stop = done.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => callback(board.totals()),
                }
            }

            // Final report
            callback(board.totals());
        });

        Self {
            handle: Some(handle),
            done,
        }
    }

    /// Start a reporter with the default 100ms poll interval.
    pub fn start_default(board: Arc<ProgressBoard>, callback: BoardCallback) -> Self {
        Self::start(board, callback, Duration::from_millis(100))
    }

    /// Stop the reporter and wait for its final report.
    pub async fn stop(mut self) {
        self.done.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

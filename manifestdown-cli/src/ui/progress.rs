//! Progress rendering for download runs.
//!
//! [`TerminalProgress`] draws one bar per active file plus a total bar and
//! clears each file's bar when it finishes. [`LineProgress`] prints plain
//! lines for logs and pipes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use manifestdown::download::{
    BoardCallback, FileReport, ProgressBoard, ProgressReporter, ProgressUnit, RunObserver,
    RunReport,
};
use parking_lot::Mutex;

const FILE_TEMPLATE: &str =
    "{msg:40!} [{bar:30.cyan/blue}] {percent:>3}% {binary_bytes_per_sec:>12} eta {eta:>4}";
const TOTAL_TEMPLATE: &str =
    "Total [{bar:40.green/white}] {binary_bytes}/{binary_total_bytes} ({percent}%) eta {eta}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌")
}

/// Line printed when a file completes.
pub fn completed_line(report: &FileReport) -> String {
    let bytes = report.outcome.bytes_written().unwrap_or(0);
    match &report.warning {
        Some(warning) => format!("Downloaded {} ({}), warning: {}", report.path, HumanBytes(bytes), warning),
        None => format!("Downloaded {} ({})", report.path, HumanBytes(bytes)),
    }
}

/// Line printed when a file fails. The error names the file.
pub fn failed_line(report: &FileReport) -> String {
    match report.error() {
        Some(error) => format!("Error: {}", error),
        None => format!("Error: {}", report.path),
    }
}

/// Multi-bar terminal renderer.
pub struct TerminalProgress {
    multi: MultiProgress,
    total: Mutex<Option<ProgressBar>>,
    bars: Mutex<HashMap<usize, ProgressBar>>,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalProgress {
    /// Draw on stderr.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
            total: Mutex::new(None),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            eprintln!("{}", line);
        }
    }

    fn finish_file(&self, index: usize) {
        if let Some(bar) = self.bars.lock().remove(&index) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}

impl RunObserver for TerminalProgress {
    fn on_run_started(&self, _files: usize, total_bytes: u64) {
        let bar = self.multi.add(ProgressBar::new(total_bytes));
        bar.set_style(style(TOTAL_TEMPLATE));
        bar.enable_steady_tick(Duration::from_millis(250));
        *self.total.lock() = Some(bar);
    }

    fn on_file_started(&self, unit: &ProgressUnit) {
        let bar = ProgressBar::new(unit.total());
        bar.set_style(style(FILE_TEMPLATE));
        bar.set_message(unit.path().to_string());

        let bar = match self.total.lock().as_ref() {
            Some(total) => self.multi.insert_before(total, bar),
            None => self.multi.add(bar),
        };
        self.bars.lock().insert(unit.index(), bar);
    }

    fn on_progress(&self, unit: &ProgressUnit) {
        let transferred = unit.transferred();
        let delta = match self.bars.lock().get(&unit.index()) {
            Some(bar) => {
                let delta = transferred.saturating_sub(bar.position());
                bar.set_position(transferred);
                delta
            }
            None => 0,
        };
        if let Some(total) = self.total.lock().as_ref() {
            total.inc(delta);
        }
    }

    fn on_file_completed(&self, report: &FileReport) {
        self.finish_file(report.index);
        self.println(completed_line(report));
    }

    fn on_file_failed(&self, report: &FileReport) {
        self.finish_file(report.index);
        self.println(failed_line(report));
    }

    fn on_run_finished(&self, _report: &RunReport) {
        if let Some(total) = self.total.lock().take() {
            total.finish_and_clear();
        }
        for (_, bar) in self.bars.lock().drain() {
            bar.finish_and_clear();
        }
    }
}

/// Plain line renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineProgress;

impl LineProgress {
    /// Start a reporter that prints aggregate progress every few seconds.
    pub fn start_reporter(board: Arc<ProgressBoard>) -> ProgressReporter {
        let callback: BoardCallback = Arc::new(|totals| {
            if totals.files == 0 {
                return;
            }
            eprintln!(
                "[{}/{} files] {} / {} ({} active, {} failed)",
                totals.finished(),
                totals.files,
                HumanBytes(totals.bytes_transferred),
                HumanBytes(totals.bytes_total),
                totals.active,
                totals.failed,
            );
        });
        ProgressReporter::start(board, callback, Duration::from_secs(2))
    }
}

impl RunObserver for LineProgress {
    fn on_run_started(&self, files: usize, total_bytes: u64) {
        println!("Downloading {} files ({})", files, HumanBytes(total_bytes));
    }

    fn on_file_completed(&self, report: &FileReport) {
        println!("{}", completed_line(report));
    }

    fn on_file_failed(&self, report: &FileReport) {
        eprintln!("{}", failed_line(report));
    }
}

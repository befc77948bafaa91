//! Progress reporting seam between long-running tasks and their observers.

use tracing::info;

/// Thread-safe sink for progress updates. Implementations are called from the
/// task worker thread and from the progress-reporting bridge thread.
pub trait ProgressMonitor: Send + Sync {
    fn set_indeterminate(&self, indeterminate: bool);
    fn set_progress(&self, percent: u8);
    fn set_progress_text(&self, text: &str);
}

/// Monitor that forwards updates to the log, used by the CLI.
pub struct LogProgressMonitor;

impl ProgressMonitor for LogProgressMonitor {
    fn set_indeterminate(&self, _indeterminate: bool) {}

    fn set_progress(&self, percent: u8) {
        info!("progress {percent}%");
    }

    fn set_progress_text(&self, text: &str) {
        info!("{text}");
    }
}

/// Monitor that discards all updates.
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn set_indeterminate(&self, _indeterminate: bool) {}

    fn set_progress(&self, _percent: u8) {}

    fn set_progress_text(&self, _text: &str) {}
}

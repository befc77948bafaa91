//! One-shot handoff from the task worker thread to a waiting consumer.
//!
//! A bounded single-slot channel carries the report: the sender side can fire
//! at most once, and the consumer that receives it owns the delivered
//! collections exclusively.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::warn;

use crate::ingest::classify::IngestResult;
use crate::types::{DataSource, IngestOutcome, TaskState};

/// Everything a finished task hands back.
#[derive(Debug)]
pub struct IngestReport {
    pub result: IngestResult,
    pub error_messages: Vec<String>,
    pub data_sources: Vec<DataSource>,
    /// One terminal outcome per processed input path, plus at most one for
    /// the local-files fallback.
    pub outcomes: Vec<IngestOutcome>,
    pub state: TaskState,
}

/// Sender half, owned by the task. `done` delivers at most once.
pub struct CompletionCallback {
    tx: Option<Sender<IngestReport>>,
}

impl CompletionCallback {
    pub fn done(&mut self, report: IngestReport) {
        match self.tx.take() {
            Some(tx) => {
                // The consumer may have given up waiting; that is its choice.
                let _ = tx.send(report);
            }
            None => warn!("completion callback invoked more than once; report dropped"),
        }
    }
}

/// Receiver half, held by the thread that submitted the task.
pub struct CompletionHandle {
    rx: Receiver<IngestReport>,
}

impl CompletionHandle {
    /// Blocks until the task delivers its report. Returns `None` when the
    /// task was dropped without ever calling `done`.
    pub fn wait(self) -> Option<IngestReport> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(self, timeout: Duration) -> Option<IngestReport> {
        self.rx.recv_timeout(timeout).ok()
    }
}

pub fn completion_channel() -> (CompletionCallback, CompletionHandle) {
    let (tx, rx) = bounded(1);
    (CompletionCallback { tx: Some(tx) }, CompletionHandle { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_report(result: IngestResult) -> IngestReport {
        IngestReport {
            result,
            error_messages: Vec::new(),
            data_sources: Vec::new(),
            outcomes: Vec::new(),
            state: TaskState::Completed,
        }
    }

    #[test]
    fn delivers_first_report_only() {
        let (mut callback, handle) = completion_channel();
        callback.done(empty_report(IngestResult::NoErrors));
        callback.done(empty_report(IngestResult::CriticalErrors));
        let report = handle.wait().expect("report");
        assert_eq!(report.result, IngestResult::NoErrors);
    }

    #[test]
    fn wait_reports_a_dropped_task() {
        let (callback, handle) = completion_channel();
        drop(callback);
        assert!(handle.wait().is_none());
    }

    #[test]
    fn unblocks_a_waiting_consumer() {
        let (mut callback, handle) = completion_channel();
        let waiter = std::thread::spawn(move || handle.wait());
        callback.done(empty_report(IngestResult::NonCriticalErrors));
        let report = waiter.join().expect("join").expect("report");
        assert_eq!(report.result, IngestResult::NonCriticalErrors);
    }
}

//! # Ingestion Task Engine
//!
//! Orchestrates the full ingestion of one request: acquires the case
//! database's exclusive lock, drives the add-image protocol per input path,
//! applies the local-files fallback policy, invokes post-processing, and
//! classifies the overall outcome before signaling the completion callback
//! exactly once.

mod attempt;
pub mod bridge;
pub mod callback;
pub mod classify;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::casedb::{CaseDatabase, ExclusiveLock};
use crate::postproc::PostProcessor;
use crate::progress::ProgressMonitor;
use crate::types::{IngestRequest, RequestKind, TaskState};

use attempt::{AttemptContext, DeferralPolicy, OutcomeLedger};
use callback::CompletionCallback;
use classify::classify;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cooperative cancellation flag, observed between units of work. An
/// in-flight add-image run always finishes (or reverts) before cancellation
/// takes effect; no partial data source is ever left half-committed.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotent. Processing already under way may complete.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::Relaxed) {
            warn!("ingestion cancelled; processing may be incomplete");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One ingestion of one request. `run` consumes the task, so a task instance
/// cannot be re-entered or reused.
pub struct IngestTask {
    request: IngestRequest,
    case_db: Arc<dyn CaseDatabase>,
    monitor: Arc<dyn ProgressMonitor>,
    callback: CompletionCallback,
    post_processor: Option<Box<dyn PostProcessor>>,
    poll_interval: Duration,
    detect_filesystems: bool,
    skip_fat_orphans: bool,
    cancel: CancelToken,
    state: TaskState,
}

impl IngestTask {
    pub fn new(
        request: IngestRequest,
        case_db: Arc<dyn CaseDatabase>,
        monitor: Arc<dyn ProgressMonitor>,
        callback: CompletionCallback,
    ) -> Self {
        Self {
            request,
            case_db,
            monitor,
            callback,
            post_processor: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            detect_filesystems: true,
            skip_fat_orphans: false,
            cancel: CancelToken::new(),
            state: TaskState::Idle,
        }
    }

    /// Attaches the external analysis step run after a successful add.
    pub fn with_post_processor(mut self, post_processor: Box<dyn PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_filesystem_options(
        mut self,
        detect_filesystems: bool,
        skip_fat_orphans: bool,
    ) -> Self {
        self.detect_filesystems = detect_filesystems;
        self.skip_fat_orphans = skip_fat_orphans;
        self
    }

    /// Token for requesting cancellation from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the task on a dedicated worker thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("ingest-task".to_string())
            .spawn(move || self.run())
            .expect("spawn ingest task thread")
    }

    /// Runs the task to completion. Never panics out and never skips the
    /// callback: every exit path classifies the accumulated outcomes and
    /// delivers them.
    pub fn run(mut self) {
        self.state = TaskState::Running;
        self.monitor.set_indeterminate(true);
        self.monitor.set_progress(0);

        let mut ledger = OutcomeLedger::default();
        match self.request.kind() {
            RequestKind::ImageSet => self.run_image_set(&mut ledger),
            RequestKind::DiskImage => self.run_disk_image(&mut ledger),
            RequestKind::MemoryImage => self.run_memory_image(&mut ledger),
        }

        self.monitor.set_progress(100);

        self.state = if self.cancel.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Completed
        };
        let result = classify(ledger.critical_error_occurred, &ledger.errors);
        info!(
            "ingestion finished for device {}: {:?}, {} data source(s), {} error(s)",
            self.request.device_id(),
            result,
            ledger.data_sources.len(),
            ledger.errors.len()
        );
        self.callback.done(IngestReport {
            result,
            error_messages: ledger.errors,
            data_sources: ledger.data_sources,
            outcomes: ledger.outcomes,
            state: self.state,
        });
    }

    fn attempt_context(&self) -> AttemptContext<'_> {
        AttemptContext {
            db: &self.case_db,
            monitor: &self.monitor,
            device_id: self.request.device_id(),
            time_zone: self.request.time_zone(),
            detect_filesystems: self.detect_filesystems,
            skip_fat_orphans: self.skip_fat_orphans,
            poll_interval: self.poll_interval,
        }
    }

    /// Multi-image ingestion with local-files fallback. The exclusive lock is
    /// held across the whole per-path loop, not per path; the add-image
    /// protocol is not safe across interleaved case mutations.
    fn run_image_set(&mut self, ledger: &mut OutcomeLedger) {
        if self.cancel.is_cancelled() {
            return;
        }
        {
            let _lock = ExclusiveLock::acquire(self.case_db.as_ref());
            let ctx = self.attempt_context();
            for path in self.request.input_paths() {
                if self.cancel.is_cancelled() {
                    break;
                }
                attempt::add_image_to_case(&ctx, path, DeferralPolicy::DeferToLocalFiles, ledger);
            }
        }

        // Inputs without a detectable filesystem become one local-files data
        // source named by the device id, appended after all image sources.
        if !self.cancel.is_cancelled() && !ledger.deferred.is_empty() {
            self.add_deferred_as_local_files(ledger);
        }
    }

    fn add_deferred_as_local_files(&mut self, ledger: &mut OutcomeLedger) {
        let device_id = self.request.device_id();
        let monitor = Arc::clone(&self.monitor);
        let mut per_file = |file: &std::path::Path| {
            monitor.set_progress_text(&format!("Adding: {} as logical file", file.display()));
        };
        match self.case_db.add_local_files_data_source(
            device_id,
            device_id,
            self.request.time_zone(),
            &ledger.deferred,
            &mut per_file,
        ) {
            Ok(data_source) => ledger.added(data_source),
            Err(err) => ledger.critical(format!(
                "Error adding images without file systems for device {device_id}: {err}"
            )),
        }
    }

    /// Single-image ingestion: no fallback (an image without a filesystem is
    /// a critical error), optional post-processing after a successful commit.
    fn run_disk_image(&mut self, ledger: &mut OutcomeLedger) {
        if self.cancel.is_cancelled() {
            return;
        }
        let path = self.request.input_paths()[0].clone();
        {
            let _lock = ExclusiveLock::acquire(self.case_db.as_ref());
            let ctx = self.attempt_context();
            attempt::add_image_to_case(&ctx, &path, DeferralPolicy::TreatAsCritical, ledger);
        }
        self.run_post_processing(ledger);
    }

    /// Memory-image ingestion: pre-flight existence check, direct
    /// registration under the lock, then analysis plugins.
    fn run_memory_image(&mut self, ledger: &mut OutcomeLedger) {
        if self.cancel.is_cancelled() {
            return;
        }
        let path = self.request.input_paths()[0].clone();
        let device_id = self.request.device_id();
        self.monitor
            .set_progress_text(&format!("Adding memory image: {}", path.display()));

        if !path.exists() {
            ledger.critical(format!(
                "Critical error adding {} for device {device_id}: file does not exist",
                path.display()
            ));
            return;
        }

        let added = {
            let _lock = ExclusiveLock::acquire(self.case_db.as_ref());
            self.case_db
                .add_image_record(device_id, &path, self.request.time_zone())
        };
        match added {
            Ok(data_source) => ledger.added(data_source),
            Err(err) => {
                ledger.critical(format!(
                    "Critical error adding {} for device {device_id}: {err}",
                    path.display()
                ));
                return;
            }
        }
        self.run_post_processing(ledger);
    }

    /// Runs the attached post-processor against the newest data source.
    /// Failure is non-critical: the data source itself was produced.
    fn run_post_processing(&mut self, ledger: &mut OutcomeLedger) {
        let Some(post_processor) = &self.post_processor else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(data_source) = ledger.data_sources.last() else {
            return;
        };
        self.monitor
            .set_progress_text(&format!("Running {} analysis", post_processor.name()));
        if let Err(err) = post_processor.run(
            data_source,
            self.request.post_plugins(),
            self.monitor.as_ref(),
            &self.cancel,
        ) {
            let message = format!(
                "Non-critical error running {} for device {}: {err}",
                post_processor.name(),
                self.request.device_id()
            );
            warn!("{message}");
            ledger.errors.push(message);
        }
    }
}

// Re-exported so callers can name the whole control surface from one place.
pub use callback::{CompletionHandle, IngestReport, completion_channel};
pub use classify::IngestResult;

//! One add-image attempt for a single input path, driving the
//! begin/run/commit/revert protocol and recording its outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::casedb::{AddImageError, AddImageProcess, CaseDatabase, CaseDbError};
use crate::ingest::bridge::ProgressReportingBridge;
use crate::progress::ProgressMonitor;
use crate::types::{DataSource, IngestOutcome};

/// Accumulated results of a task run. The task owns this exclusively while it
/// runs and publishes an immutable copy through the callback at the end.
#[derive(Default)]
pub(crate) struct OutcomeLedger {
    pub outcomes: Vec<IngestOutcome>,
    pub errors: Vec<String>,
    pub data_sources: Vec<DataSource>,
    pub deferred: Vec<PathBuf>,
    pub critical_error_occurred: bool,
}

impl OutcomeLedger {
    pub(crate) fn added(&mut self, data_source: DataSource) {
        self.outcomes.push(IngestOutcome::Added(data_source.clone()));
        self.data_sources.push(data_source);
    }

    pub(crate) fn critical(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message.clone());
        self.outcomes.push(IngestOutcome::CriticalError(message));
        self.critical_error_occurred = true;
    }
}

/// Whether an input without a detectable filesystem may be retried as part of
/// a local-files data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferralPolicy {
    DeferToLocalFiles,
    TreatAsCritical,
}

pub(crate) struct AttemptContext<'a> {
    pub db: &'a Arc<dyn CaseDatabase>,
    pub monitor: &'a Arc<dyn ProgressMonitor>,
    pub device_id: &'a str,
    pub time_zone: &'a str,
    pub detect_filesystems: bool,
    pub skip_fat_orphans: bool,
    pub poll_interval: Duration,
}

/// Attempts to add one input path to the case as an image.
///
/// Exactly one terminal outcome is recorded per call: `Added` on a clean
/// commit, `NonCriticalError` when a recoverable data error was tolerated but
/// the image still committed, `DeferredAsLocalFiles` when no filesystem was
/// found and the attempt reverted cleanly, and `CriticalError` otherwise.
pub(crate) fn add_image_to_case(
    ctx: &AttemptContext<'_>,
    path: &Path,
    policy: DeferralPolicy,
    ledger: &mut OutcomeLedger,
) {
    ctx.monitor
        .set_progress_text(&format!("Adding: {}", path.display()));

    let mut process =
        ctx.db
            .make_add_image_process(ctx.time_zone, ctx.detect_filesystems, ctx.skip_fat_orphans);
    let bridge = ProgressReportingBridge::start(
        Arc::clone(ctx.monitor),
        process.live_status(),
        ctx.poll_interval,
    );
    let run_result = process.run(ctx.device_id, &[path.to_path_buf()]);
    bridge.stop();

    let mut recoverable = None;
    match run_result {
        Ok(()) => {}
        Err(AddImageError::Recoverable(msg)) => {
            let message = format!(
                "Non-critical error adding {} for device {}: {msg}",
                path.display(),
                ctx.device_id
            );
            warn!("{message}");
            ledger.errors.push(message.clone());
            recoverable = Some(message);
        }
        Err(err @ AddImageError::NoFilesystem { .. })
            if policy == DeferralPolicy::DeferToLocalFiles =>
        {
            match process.revert() {
                Ok(()) => {
                    info!(
                        "no file system in {}; deferring to local-files fallback",
                        path.display()
                    );
                    ledger
                        .outcomes
                        .push(IngestOutcome::DeferredAsLocalFiles(path.to_path_buf()));
                    ledger.deferred.push(path.to_path_buf());
                }
                Err(revert_err) => {
                    // A failed revert leaves nothing to defer; escalate both.
                    ledger.critical(combined_revert_message(
                        path,
                        ctx.device_id,
                        &err,
                        &revert_err,
                    ));
                }
            }
            return;
        }
        Err(err) => {
            match process.revert() {
                Ok(()) => ledger.critical(format!(
                    "Critical error adding {} for device {}: {err}",
                    path.display(),
                    ctx.device_id
                )),
                Err(revert_err) => ledger.critical(combined_revert_message(
                    path,
                    ctx.device_id,
                    &err,
                    &revert_err,
                )),
            }
            return;
        }
    }

    // Commit the attempt, look the new image up, and note a size mismatch
    // without failing the registration.
    match commit_and_fetch(ctx.db, process.as_mut()) {
        Ok(data_source) => {
            if let Some(mismatch) = data_source.verify_size() {
                let message = format!(
                    "Non-critical error adding {} for device {}: {mismatch}",
                    path.display(),
                    ctx.device_id
                );
                warn!("{message}");
                ledger.errors.push(message);
            }
            match recoverable {
                Some(message) => {
                    ledger
                        .outcomes
                        .push(IngestOutcome::NonCriticalError(message));
                    ledger.data_sources.push(data_source);
                }
                None => ledger.added(data_source),
            }
        }
        Err(err) => {
            ledger.critical(format!(
                "Critical error adding {} for device {}: {err}",
                path.display(),
                ctx.device_id
            ));
        }
    }
}

fn commit_and_fetch(
    db: &Arc<dyn CaseDatabase>,
    process: &mut dyn AddImageProcess,
) -> Result<DataSource, CaseDbError> {
    let image_id = process.commit()?;
    db.image_by_id(image_id)
}

fn combined_revert_message(
    path: &Path,
    device_id: &str,
    original: &AddImageError,
    revert_err: &CaseDbError,
) -> String {
    format!(
        "Critical error adding {} for device {device_id}: {original}; revert also failed: {revert_err}",
        path.display()
    )
}

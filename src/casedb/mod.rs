//! # Case Database Gateway
//!
//! Traits for the transactional add-image protocol and the exclusive-lock
//! surface of a case's persistent store. The engine only ever talks to these
//! traits; a rusqlite-backed reference implementation lives in [`sqlite`].

pub mod sqlite;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

use crate::types::DataSource;

#[derive(Debug, Error)]
pub enum CaseDbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("case database error: {0}")]
    Backend(String),
    #[error("no data source with id {0}")]
    UnknownDataSource(i64),
}

/// Failure modes of one add-image run, distinguishable so the task can apply
/// the right fallback policy.
#[derive(Debug, Error)]
pub enum AddImageError {
    /// No filesystem could be identified in the input. Recoverable at the
    /// task level by re-adding the input as part of a local-files data source.
    #[error("cannot determine file system type for {}", path.display())]
    NoFilesystem { path: PathBuf },
    /// Any other structural failure. The attempt must be reverted.
    #[error("add-image failed: {0}")]
    Structural(String),
    /// Partial read, checksum mismatch, and similar. The partially added
    /// image is still usable and should be committed.
    #[error("recoverable data error: {0}")]
    Recoverable(String),
}

/// Live status of a running add-image attempt, shared between the worker
/// performing the add and the bridge thread polling it.
#[derive(Default)]
pub struct AddImageLiveStatus {
    text: Mutex<String>,
    percent: AtomicU8,
}

impl AddImageLiveStatus {
    pub fn update(&self, text: &str, percent: u8) {
        *self.text.lock().unwrap() = text.to_string();
        self.percent.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (String, u8) {
        (
            self.text.lock().unwrap().clone(),
            self.percent.load(Ordering::Relaxed),
        )
    }
}

/// One image-addition attempt: `run` then either `commit` or `revert`.
/// The protocol admits at most one outstanding image per process.
pub trait AddImageProcess: Send {
    /// Handle the bridge thread polls while `run` blocks the worker.
    fn live_status(&self) -> std::sync::Arc<AddImageLiveStatus>;

    /// Reads the input and stages it in the case database, uncommitted.
    /// Paths are the ordered parts of one logical image.
    fn run(&mut self, device_id: &str, paths: &[PathBuf]) -> Result<(), AddImageError>;

    /// Makes the staged image permanent and returns its database id.
    fn commit(&mut self) -> Result<i64, CaseDbError>;

    /// Discards the staged image.
    fn revert(&mut self) -> Result<(), CaseDbError>;
}

/// Gateway to the case's persistent store.
pub trait CaseDatabase: Send + Sync {
    /// Blocks until the exclusive lock is held. Must be paired with
    /// [`CaseDatabase::release_exclusive_lock`]; prefer [`ExclusiveLock`].
    fn acquire_exclusive_lock(&self);

    fn release_exclusive_lock(&self);

    fn make_add_image_process(
        &self,
        time_zone: &str,
        detect_filesystems: bool,
        skip_fat_orphans: bool,
    ) -> Box<dyn AddImageProcess>;

    fn image_by_id(&self, id: i64) -> Result<DataSource, CaseDbError>;

    /// Registers a set of plain files as one logical data source rooted at
    /// `root_name`, invoking `progress` once per file added.
    fn add_local_files_data_source(
        &self,
        device_id: &str,
        root_name: &str,
        time_zone: &str,
        paths: &[PathBuf],
        progress: &mut dyn FnMut(&Path),
    ) -> Result<DataSource, CaseDbError>;

    /// Registers a raw image directly, without the staged add-image protocol.
    /// Used for memory images.
    fn add_image_record(
        &self,
        device_id: &str,
        path: &Path,
        time_zone: &str,
    ) -> Result<DataSource, CaseDbError>;
}

/// Scoped acquisition of the case database's exclusive lock. Releases on
/// every exit path, including panics.
pub struct ExclusiveLock<'a> {
    db: &'a dyn CaseDatabase,
}

impl<'a> ExclusiveLock<'a> {
    pub fn acquire(db: &'a dyn CaseDatabase) -> Self {
        db.acquire_exclusive_lock();
        Self { db }
    }
}

impl Drop for ExclusiveLock<'_> {
    fn drop(&mut self) {
        self.db.release_exclusive_lock();
    }
}

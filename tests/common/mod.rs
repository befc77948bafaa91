//! Shared test infrastructure for the ingestion engine tests.
//!
//! Provides a scripted mock case database whose add-image protocol fails on
//! demand, plus a progress monitor that records everything it is told.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use caseforge::casedb::{
    AddImageError, AddImageLiveStatus, AddImageProcess, CaseDatabase, CaseDbError,
};
use caseforge::ingest::callback::CompletionCallback;
use caseforge::ingest::{CancelToken, IngestTask};
use caseforge::postproc::{PostProcessError, PostProcessor};
use caseforge::progress::ProgressMonitor;
use caseforge::types::{DataSource, DataSourceKind, IngestRequest};

/// What the mock add-image protocol should do for one input path.
#[derive(Clone, Copy)]
pub enum Script {
    /// run and commit succeed; the committed data source gets these sizes.
    Commit { size: u64, expected: u64 },
    /// run fails recoverably but the image still stages and commits.
    Recoverable {
        message: &'static str,
        size: u64,
        expected: u64,
    },
    /// run fails because no filesystem was found; revert succeeds.
    NoFilesystem,
    /// run fails because no filesystem was found; revert fails too.
    NoFilesystemRevertFails,
    /// run fails structurally; revert succeeds.
    Structural(&'static str),
    /// run succeeds but commit fails.
    CommitFails,
}

pub struct MockState {
    scripts: Mutex<HashMap<PathBuf, Script>>,
    pub lock_acquires: AtomicUsize,
    pub lock_releases: AtomicUsize,
    next_id: AtomicI64,
    pub committed: Mutex<Vec<DataSource>>,
    pub reverted: Mutex<Vec<PathBuf>>,
    pub fail_local_files: AtomicBool,
    pub local_files_calls: Mutex<Vec<Vec<PathBuf>>>,
    /// When set, the first add-image run fires this token, simulating a
    /// cancellation that lands while a path is being processed.
    pub cancel_during_first_run: Mutex<Option<CancelToken>>,
}

#[derive(Clone)]
pub struct MockCaseDb {
    pub state: Arc<MockState>,
}

impl MockCaseDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                scripts: Mutex::new(HashMap::new()),
                lock_acquires: AtomicUsize::new(0),
                lock_releases: AtomicUsize::new(0),
                next_id: AtomicI64::new(1),
                committed: Mutex::new(Vec::new()),
                reverted: Mutex::new(Vec::new()),
                fail_local_files: AtomicBool::new(false),
                local_files_calls: Mutex::new(Vec::new()),
                cancel_during_first_run: Mutex::new(None),
            }),
        }
    }

    pub fn script(&self, path: &str, script: Script) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), script);
    }

    pub fn lock_balance(&self) -> (usize, usize) {
        (
            self.state.lock_acquires.load(Ordering::SeqCst),
            self.state.lock_releases.load(Ordering::SeqCst),
        )
    }

    pub fn committed_count(&self) -> usize {
        self.state.committed.lock().unwrap().len()
    }
}

impl CaseDatabase for MockCaseDb {
    fn acquire_exclusive_lock(&self) {
        self.state.lock_acquires.fetch_add(1, Ordering::SeqCst);
    }

    fn release_exclusive_lock(&self) {
        self.state.lock_releases.fetch_add(1, Ordering::SeqCst);
    }

    fn make_add_image_process(
        &self,
        _time_zone: &str,
        _detect_filesystems: bool,
        _skip_fat_orphans: bool,
    ) -> Box<dyn AddImageProcess> {
        Box::new(MockProcess {
            state: Arc::clone(&self.state),
            status: Arc::new(AddImageLiveStatus::default()),
            device_id: String::new(),
            path: PathBuf::new(),
            staged: None,
        })
    }

    fn image_by_id(&self, id: i64) -> Result<DataSource, CaseDbError> {
        self.state
            .committed
            .lock()
            .unwrap()
            .iter()
            .find(|ds| ds.id == id)
            .cloned()
            .ok_or(CaseDbError::UnknownDataSource(id))
    }

    fn add_local_files_data_source(
        &self,
        device_id: &str,
        root_name: &str,
        _time_zone: &str,
        paths: &[PathBuf],
        progress: &mut dyn FnMut(&Path),
    ) -> Result<DataSource, CaseDbError> {
        self.state
            .local_files_calls
            .lock()
            .unwrap()
            .push(paths.to_vec());
        if self.state.fail_local_files.load(Ordering::SeqCst) {
            return Err(CaseDbError::Backend(
                "logical file set rejected".to_string(),
            ));
        }
        for path in paths {
            progress(path);
        }
        let ds = DataSource {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            device_id: device_id.to_string(),
            kind: DataSourceKind::LocalFiles,
            name: root_name.to_string(),
            size: paths.len() as u64,
            expected_size: paths.len() as u64,
        };
        self.state.committed.lock().unwrap().push(ds.clone());
        Ok(ds)
    }

    fn add_image_record(
        &self,
        device_id: &str,
        path: &Path,
        _time_zone: &str,
    ) -> Result<DataSource, CaseDbError> {
        let len = std::fs::metadata(path)?.len();
        let ds = DataSource {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            device_id: device_id.to_string(),
            kind: DataSourceKind::MemoryImage,
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: len,
            expected_size: len,
        };
        self.state.committed.lock().unwrap().push(ds.clone());
        Ok(ds)
    }
}

struct Staged {
    size: u64,
    expected: u64,
    commit_fails: bool,
}

struct MockProcess {
    state: Arc<MockState>,
    status: Arc<AddImageLiveStatus>,
    device_id: String,
    path: PathBuf,
    staged: Option<Staged>,
}

impl MockProcess {
    fn script_for(&self, path: &Path) -> Script {
        *self
            .state
            .scripts
            .lock()
            .unwrap()
            .get(path)
            .unwrap_or_else(|| panic!("no script for {}", path.display()))
    }
}

impl AddImageProcess for MockProcess {
    fn live_status(&self) -> Arc<AddImageLiveStatus> {
        Arc::clone(&self.status)
    }

    fn run(&mut self, device_id: &str, paths: &[PathBuf]) -> Result<(), AddImageError> {
        let path = paths[0].clone();
        self.device_id = device_id.to_string();
        self.path = path.clone();
        self.status.update(&path.display().to_string(), 50);

        if let Some(token) = self.state.cancel_during_first_run.lock().unwrap().take() {
            token.cancel();
        }

        match self.script_for(&path) {
            Script::Commit { size, expected } => {
                self.staged = Some(Staged {
                    size,
                    expected,
                    commit_fails: false,
                });
                Ok(())
            }
            Script::Recoverable {
                message,
                size,
                expected,
            } => {
                self.staged = Some(Staged {
                    size,
                    expected,
                    commit_fails: false,
                });
                Err(AddImageError::Recoverable(message.to_string()))
            }
            Script::NoFilesystem | Script::NoFilesystemRevertFails => {
                Err(AddImageError::NoFilesystem { path })
            }
            Script::Structural(message) => Err(AddImageError::Structural(message.to_string())),
            Script::CommitFails => {
                self.staged = Some(Staged {
                    size: 0,
                    expected: 0,
                    commit_fails: true,
                });
                Ok(())
            }
        }
    }

    fn commit(&mut self) -> Result<i64, CaseDbError> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| CaseDbError::Backend("nothing staged".to_string()))?;
        if staged.commit_fails {
            return Err(CaseDbError::Backend("commit rejected".to_string()));
        }
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let ds = DataSource {
            id,
            device_id: self.device_id.clone(),
            kind: DataSourceKind::Image,
            name: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: staged.size,
            expected_size: staged.expected,
        };
        self.state.committed.lock().unwrap().push(ds);
        Ok(id)
    }

    fn revert(&mut self) -> Result<(), CaseDbError> {
        self.state.reverted.lock().unwrap().push(self.path.clone());
        self.staged = None;
        let script = self.script_for(&self.path);
        if matches!(script, Script::NoFilesystemRevertFails) {
            return Err(CaseDbError::Backend("revert rejected".to_string()));
        }
        Ok(())
    }
}

/// Progress monitor that records every update it receives.
#[derive(Default)]
pub struct RecordingMonitor {
    pub texts: Mutex<Vec<String>>,
    pub percents: Mutex<Vec<u8>>,
    pub indeterminate: AtomicBool,
}

impl ProgressMonitor for RecordingMonitor {
    fn set_indeterminate(&self, indeterminate: bool) {
        self.indeterminate.store(indeterminate, Ordering::SeqCst);
    }

    fn set_progress(&self, percent: u8) {
        self.percents.lock().unwrap().push(percent);
    }

    fn set_progress_text(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_string());
    }
}

/// Post-processor stand-in for an external analysis tool.
pub struct MockPostProcessor {
    pub fail: bool,
    pub ran: Arc<AtomicBool>,
    pub plugins_seen: Arc<Mutex<Vec<String>>>,
}

impl MockPostProcessor {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            ran: Arc::new(AtomicBool::new(false)),
            plugins_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl PostProcessor for MockPostProcessor {
    fn name(&self) -> &str {
        "memscan"
    }

    fn run(
        &self,
        _data_source: &DataSource,
        plugins: &[String],
        monitor: &dyn ProgressMonitor,
        _cancel: &CancelToken,
    ) -> Result<(), PostProcessError> {
        self.ran.store(true, Ordering::SeqCst);
        for plugin in plugins {
            monitor.set_progress_text(&format!("Running plugin: {plugin}"));
            self.plugins_seen.lock().unwrap().push(plugin.clone());
        }
        if self.fail {
            return Err(PostProcessError("plugin exited with status 2".to_string()));
        }
        Ok(())
    }
}

/// Builds a task over the mock database with a short bridge poll interval.
pub fn task_for(db: &MockCaseDb, request: IngestRequest, callback: CompletionCallback) -> IngestTask {
    IngestTask::new(
        request,
        Arc::new(db.clone()),
        Arc::new(RecordingMonitor::default()),
        callback,
    )
    .with_poll_interval(Duration::from_millis(1))
}

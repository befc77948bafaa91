use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("device id must be non-empty and printable")]
    InvalidDeviceId,
    #[error("at least one input path is required")]
    NoInputPaths,
    #[error("{kind:?} requests take exactly one input path, got {got}")]
    SinglePathRequired { kind: RequestKind, got: usize },
}

/// Closed set of ingestion request kinds, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// One filesystem image; no local-files fallback, optional post-processing.
    DiskImage,
    /// Several image files (e.g. a device extraction folder); inputs without a
    /// detectable filesystem fall back to one local-files data source.
    ImageSet,
    /// One raw memory image registered directly, then handed to analysis plugins.
    MemoryImage,
}

/// Immutable description of one logical ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    device_id: String,
    input_paths: Vec<PathBuf>,
    time_zone: String,
    kind: RequestKind,
    post_plugins: Vec<String>,
}

impl IngestRequest {
    /// Builds a request, rejecting shapes the given kind cannot process.
    pub fn new(
        kind: RequestKind,
        device_id: impl Into<String>,
        input_paths: Vec<PathBuf>,
        time_zone: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let device_id = device_id.into();
        if device_id.trim().is_empty() || device_id.chars().any(|c| c.is_control()) {
            return Err(RequestError::InvalidDeviceId);
        }
        if input_paths.is_empty() {
            return Err(RequestError::NoInputPaths);
        }
        if matches!(kind, RequestKind::DiskImage | RequestKind::MemoryImage)
            && input_paths.len() != 1
        {
            return Err(RequestError::SinglePathRequired {
                kind,
                got: input_paths.len(),
            });
        }
        Ok(Self {
            device_id,
            input_paths,
            time_zone: time_zone.into(),
            kind,
            post_plugins: Vec::new(),
        })
    }

    /// Names the analysis plugins to run after a successful add.
    pub fn with_post_plugins(mut self, plugins: Vec<String>) -> Self {
        self.post_plugins = plugins;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn input_paths(&self) -> &[PathBuf] {
        &self.input_paths
    }

    pub fn time_zone(&self) -> &str {
        &self.time_zone
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn post_plugins(&self) -> &[String] {
        &self.post_plugins
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    Image,
    LocalFiles,
    MemoryImage,
}

/// One registered acquisition inside the case database. The database owns the
/// persisted entity; tasks only hold this handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub id: i64,
    pub device_id: String,
    pub kind: DataSourceKind,
    pub name: String,
    pub size: u64,
    pub expected_size: u64,
}

impl DataSource {
    /// Compares the stored size against what the acquisition claimed.
    /// A mismatch is informational; the data source stays usable.
    pub fn verify_size(&self) -> Option<String> {
        if self.size == self.expected_size {
            None
        } else {
            Some(format!(
                "size mismatch for {}: expected {} bytes, got {}",
                self.name, self.expected_size, self.size
            ))
        }
    }
}

/// Terminal outcome recorded for each input path that was processed, plus at
/// most one extra outcome for the trailing local-files fallback.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Added(DataSource),
    DeferredAsLocalFiles(PathBuf),
    NonCriticalError(String),
    CriticalError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

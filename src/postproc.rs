//! Post-processing seam for external analysis tools run against a newly
//! added data source (e.g. a memory-analysis plugin runner). Invocation is an
//! opaque long-running step with its own progress updates; the engine only
//! classifies its failure.

use thiserror::Error;

use crate::ingest::CancelToken;
use crate::progress::ProgressMonitor;
use crate::types::DataSource;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct PostProcessError(pub String);

pub trait PostProcessor: Send {
    fn name(&self) -> &str;

    /// Runs the named plugins against the data source. Implementations should
    /// report progress through the monitor and observe the cancel token
    /// between plugins.
    fn run(
        &self,
        data_source: &DataSource,
        plugins: &[String],
        monitor: &dyn ProgressMonitor,
        cancel: &CancelToken,
    ) -> Result<(), PostProcessError>;
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use caseforge::casedb::sqlite::SqliteCaseDb;
use caseforge::cli::{self, SourceKind};
use caseforge::config;
use caseforge::ingest::{IngestResult, IngestTask, completion_channel};
use caseforge::logging;
use caseforge::progress::LogProgressMonitor;
use caseforge::types::{IngestRequest, RequestKind};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();
    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let cfg = loaded.config;

    let kind = match cli_opts.kind {
        SourceKind::Image => RequestKind::DiskImage,
        SourceKind::ImageSet => RequestKind::ImageSet,
        SourceKind::Memory => RequestKind::MemoryImage,
    };
    let device_id = cli_opts.device_id.unwrap_or_else(|| cfg.run_id.clone());
    let time_zone = cli_opts
        .time_zone
        .unwrap_or_else(|| cfg.default_time_zone.clone());

    let mut request = IngestRequest::new(kind, device_id, cli_opts.input, time_zone)?;
    if let Some(plugins) = cli_opts.plugins {
        if kind != RequestKind::MemoryImage {
            warn!("--plugins only applies to memory images; ignored");
        } else {
            warn!("no analysis backend is configured; plugin list recorded but not run");
            request = request.with_post_plugins(plugins);
        }
    }

    info!(
        "starting run_id={} case_db={} device={} kind={:?} inputs={}",
        cfg.run_id,
        cli_opts.case_db.display(),
        request.device_id(),
        request.kind(),
        request.input_paths().len()
    );

    let case_db = Arc::new(SqliteCaseDb::open(&cli_opts.case_db)?);
    let monitor = Arc::new(LogProgressMonitor);
    let (callback, handle) = completion_channel();

    let detect = cfg.detect_filesystems && !cli_opts.no_detect_filesystems;
    let task = IngestTask::new(request, case_db, monitor, callback)
        .with_poll_interval(Duration::from_millis(cfg.progress_poll_ms))
        .with_filesystem_options(detect, cfg.skip_fat_orphans);

    let cancel = task.cancel_token();
    ctrlc::set_handler(move || cancel.cancel())?;

    let worker = task.spawn();
    let report = handle.wait();
    let _ = worker.join();

    let Some(report) = report else {
        bail!("ingestion task ended without delivering a result");
    };
    for message in &report.error_messages {
        warn!("{message}");
    }
    for data_source in &report.data_sources {
        info!(
            "data source #{}: {} ({:?}, {} bytes)",
            data_source.id, data_source.name, data_source.kind, data_source.size
        );
    }
    info!("ingestion result: {:?} ({:?})", report.result, report.state);

    if report.result == IngestResult::CriticalErrors {
        bail!("ingestion completed with critical errors");
    }
    Ok(())
}

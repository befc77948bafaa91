//! Background observer for one add-image attempt.
//!
//! While `AddImageProcess::run` blocks the task thread, this bridge polls the
//! attempt's live status on a fixed interval and forwards it to the shared
//! progress monitor. The owner stops and joins the bridge when the attempt
//! finishes; dropping the bridge does the same, so it can never outlive the
//! attempt it observes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use crate::casedb::AddImageLiveStatus;
use crate::progress::ProgressMonitor;

pub struct ProgressReportingBridge {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReportingBridge {
    pub fn start(
        monitor: Arc<dyn ProgressMonitor>,
        status: Arc<AddImageLiveStatus>,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("add-image-progress".to_string())
            .spawn(move || {
                let mut last_text = String::new();
                while !stop_flag.load(Ordering::Relaxed) {
                    let (text, percent) = status.snapshot();
                    if !text.is_empty() && text != last_text {
                        monitor.set_progress_text(&format!("Adding: {text}"));
                        last_text = text;
                    }
                    if percent > 0 {
                        monitor.set_progress(percent);
                    }
                    thread::park_timeout(interval);
                }
            })
            .expect("spawn progress bridge thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the polling loop and joins it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("progress bridge thread panicked");
            }
        }
    }
}

impl Drop for ProgressReportingBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

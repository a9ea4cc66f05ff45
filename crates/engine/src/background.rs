//! The background commit thread.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mmj_core::{Error, Result};
use tracing::{debug, error, info};

use crate::engine::EngineShared;

const THREAD_NAME: &str = "mmj-journal";

/// Runs a group commit every commit interval until shutdown.
pub(crate) struct DurabilityBackgroundThread {
    shared: Arc<EngineShared>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl DurabilityBackgroundThread {
    pub(crate) fn spawn(shared: Arc<EngineShared>) -> Result<Self> {
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(&worker))?;
        Ok(DurabilityBackgroundThread {
            shared,
            handle: Some(handle),
        })
    }

    /// Wait for the thread to finish its final cycle. Shutdown must already
    /// be requested.
    pub(crate) fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::invariant("journal thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for DurabilityBackgroundThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.shutdown.request();
            self.shared.kick();
            let _ = handle.join();
        }
    }
}

fn run(shared: &EngineShared) -> Result<()> {
    let same_device = same_device(&shared.config.data_dir, &shared.config.journal_dir());
    let interval = shared.config.commit_interval(same_device);
    let sync_interval = shared.config.data_file_sync_interval();
    info!(
        interval_ms = interval.as_millis() as u64,
        same_device, "journal thread started"
    );

    let mut last_flush = Instant::now();
    loop {
        shared.stats.rotate();
        wait_for_work(shared, interval);
        let stopping = shared.shutdown.is_requested();

        if let Err(e) = shared.background_group_commit() {
            error!(error = %e, "group commit failed, journal thread exiting");
            return Err(e);
        }
        if stopping || last_flush.elapsed() >= sync_interval {
            if let Err(e) = shared.flush_data_files() {
                let e = shared.fatal.abort_on_fatal("flush data files", e);
                error!(error = %e, "data file flush failed, journal thread exiting");
                return Err(e);
            }
            last_flush = Instant::now();
        }
        if stopping {
            break;
        }
    }
    info!(
        cycles = shared.cycles.load(std::sync::atomic::Ordering::Acquire),
        "journal thread stopped"
    );
    Ok(())
}

/// Sleep a third of the interval, then up to two more thirds unless a
/// thread is waiting for a commit or the log is past half its budget.
fn wait_for_work(shared: &EngineShared, interval: Duration) {
    let third = interval / 3;
    let mut kicked = shared.kick.lock();
    if !*kicked && !shared.shutdown.is_requested() {
        shared.kicked.wait_for(&mut kicked, third);
    }
    for _ in 0..2 {
        if *kicked || shared.shutdown.is_requested() {
            break;
        }
        if shared.job.n_waiting() > 0 {
            break;
        }
        if shared.job.bytes() > shared.config.uncommitted_bytes_limit / 2 {
            debug!(bytes = shared.job.bytes(), "log past half its budget, committing early");
            break;
        }
        shared.kicked.wait_for(&mut kicked, third);
    }
    *kicked = false;
}

/// Whether the data and journal directories live on the same device.
#[cfg(unix)]
fn same_device(data_dir: &Path, journal_dir: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (data_dir.metadata(), journal_dir.metadata()) {
        (Ok(a), Ok(b)) => a.dev() == b.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_device(_data_dir: &Path, _journal_dir: &Path) -> bool {
    false
}

//! Commit statistics.
//!
//! Counters accumulate in the current window; every `stats_interval` the
//! window is closed, handed to the metrics sink as a flat map, and kept as
//! the "last complete window" until the next rotation. Totals since startup
//! are kept alongside.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Receives the closed stats window on every rotation.
pub trait MetricsSink: Send + Sync {
    /// Publish one window.
    fn publish(&self, metrics: &BTreeMap<String, f64>);
}

/// Counters of one window.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatsWindow {
    /// Commit cycles that journaled something
    pub commits: u64,
    /// Bytes appended to the journal
    pub journaled_bytes: u64,
    /// Section bytes before compression
    pub uncompressed_bytes: u64,
    /// Bytes written to shared views
    pub write_to_data_files_bytes: u64,
    /// Commits run while the caller held the global write lock
    pub commits_in_write_lock: u64,
    /// Commits forced by foreground threads
    pub early_commits: u64,
    /// Private-view remap sweeps
    pub remap_sweeps: u64,
    /// Time preparing sections (microseconds)
    pub prep_log_buffer_micros: u64,
    /// Time writing the journal (microseconds)
    pub write_to_journal_micros: u64,
    /// Time writing data files (microseconds)
    pub write_to_data_files_micros: u64,
    /// Time remapping (microseconds)
    pub remap_private_view_micros: u64,
    /// Window length in milliseconds, set when the window closes
    pub dt_millis: u64,
}

impl StatsWindow {
    /// Column names for [`as_csv`](Self::as_csv).
    pub fn csv_header() -> &'static str {
        "cmts\tjrnMB\twrDFMB\tcIWLk\tearly\tprpLgB\twrToJ\twrToDF\trmpPrVw"
    }

    /// One tab separated line, times in milliseconds.
    pub fn as_csv(&self) -> String {
        format!(
            "{}\t{:.2}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.commits,
            self.journaled_bytes as f64 / 1_000_000.0,
            self.write_to_data_files_bytes as f64 / 1_000_000.0,
            self.commits_in_write_lock,
            self.early_commits,
            self.prep_log_buffer_micros / 1000,
            self.write_to_journal_micros / 1000,
            self.write_to_data_files_micros / 1000,
            self.remap_private_view_micros / 1000,
        )
    }

    /// Flat key to value mapping.
    pub fn as_metrics(&self) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("commits".to_string(), self.commits as f64);
        m.insert(
            "journaledMB".to_string(),
            self.journaled_bytes as f64 / 1_000_000.0,
        );
        m.insert(
            "writeToDataFilesMB".to_string(),
            self.write_to_data_files_bytes as f64 / 1_000_000.0,
        );
        m.insert(
            "compression".to_string(),
            self.journaled_bytes as f64 / (self.uncompressed_bytes as f64 + 1.0),
        );
        m.insert(
            "commitsInWriteLock".to_string(),
            self.commits_in_write_lock as f64,
        );
        m.insert("earlyCommits".to_string(), self.early_commits as f64);
        m.insert("remapSweeps".to_string(), self.remap_sweeps as f64);
        m.insert("timeMs.dt".to_string(), self.dt_millis as f64);
        m.insert(
            "timeMs.prepLogBuffer".to_string(),
            (self.prep_log_buffer_micros / 1000) as f64,
        );
        m.insert(
            "timeMs.writeToJournal".to_string(),
            (self.write_to_journal_micros / 1000) as f64,
        );
        m.insert(
            "timeMs.writeToDataFiles".to_string(),
            (self.write_to_data_files_micros / 1000) as f64,
        );
        m.insert(
            "timeMs.remapPrivateView".to_string(),
            (self.remap_private_view_micros / 1000) as f64,
        );
        m
    }
}

struct Windows {
    current: StatsWindow,
    last: StatsWindow,
    totals: StatsWindow,
    last_rotate: Instant,
}

/// Rotating commit statistics.
pub struct DurStats {
    interval: Duration,
    windows: Mutex<Windows>,
    sink: Option<Box<dyn MetricsSink>>,
}

impl DurStats {
    /// Stats rotating every `interval`; a zero interval never rotates.
    pub fn new(interval: Duration, sink: Option<Box<dyn MetricsSink>>) -> Self {
        DurStats {
            interval,
            windows: Mutex::new(Windows {
                current: StatsWindow::default(),
                last: StatsWindow::default(),
                totals: StatsWindow::default(),
                last_rotate: Instant::now(),
            }),
            sink,
        }
    }

    /// Apply `f` to the current window and the totals.
    pub fn record(&self, f: impl Fn(&mut StatsWindow)) {
        let mut w = self.windows.lock();
        f(&mut w.current);
        f(&mut w.totals);
    }

    /// Close the current window if the interval has elapsed.
    ///
    /// Returns true when a window was closed.
    pub fn rotate(&self) -> bool {
        let closed = {
            let mut w = self.windows.lock();
            let dt = w.last_rotate.elapsed();
            if self.interval.is_zero() || dt < self.interval {
                return false;
            }
            w.current.dt_millis = dt.as_millis() as u64;
            w.last = std::mem::take(&mut w.current);
            w.last_rotate = Instant::now();
            w.last.clone()
        };
        debug!(target: "mmj::stats", "{}", closed.as_csv());
        if let Some(sink) = &self.sink {
            sink.publish(&closed.as_metrics());
        }
        true
    }

    /// Last closed window.
    pub fn last_window(&self) -> StatsWindow {
        self.windows.lock().last.clone()
    }

    /// Window being filled.
    pub fn current(&self) -> StatsWindow {
        self.windows.lock().current.clone()
    }

    /// Counters since startup.
    pub fn totals(&self) -> StatsWindow {
        self.windows.lock().totals.clone()
    }
}

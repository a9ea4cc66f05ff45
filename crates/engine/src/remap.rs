//! Private view remapping.
//!
//! Each sweep remaps a slice of the open files, sized so that every file is
//! visited about once per sweep period, and larger when private-view writes
//! approach the budget. A rotating start index makes successive partial
//! sweeps cover the files round-robin.

use std::time::{Duration, Instant};

use mmj_concurrency::{CommitJob, LockState};
use mmj_core::{DurabilityConfig, Error, Result};
use mmj_storage::MappedFileRegistry;
use tracing::debug;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RemapSweep {
    /// Files open at the time
    pub files: usize,
    /// Files visited
    pub visited: usize,
    /// Files actually remapped (those that had diverged)
    pub remapped: usize,
    /// Index the sweep started at
    pub started_at: usize,
    /// Fraction of files the sweep aimed for
    pub fraction: f64,
}

/// Number of files to visit for `fraction` of `files`, at least one.
pub fn files_to_visit(files: usize, fraction: f64) -> usize {
    let n = (files as f64 * fraction) as usize;
    n.clamp(1, files.max(1))
}

/// Remaps private views in rotating partial sweeps.
#[derive(Debug)]
pub struct PrivateViewRemapper {
    start_at: usize,
    last_remap: Option<Instant>,
    sweep_period: Duration,
    always_remap: bool,
    budget: usize,
}

impl PrivateViewRemapper {
    /// A remapper following `config`.
    pub fn new(config: &DurabilityConfig) -> Self {
        PrivateViewRemapper {
            start_at: 0,
            last_remap: None,
            sweep_period: config.remap_sweep_period(),
            always_remap: config.always_remap,
            budget: config.uncommitted_bytes_limit,
        }
    }

    /// Run one sweep.
    ///
    /// The caller must hold the global write lock and the intent log must be
    /// empty: remapping drops every private-view byte not yet in the file.
    pub fn remap_private_views(
        &mut self,
        lock: &LockState,
        job: &CommitJob,
        registry: &MappedFileRegistry,
    ) -> Result<RemapSweep> {
        if !lock.is_w() {
            return Err(Error::invariant(format!(
                "remap requires the global write lock, holding {}",
                lock.mode().name()
            )));
        }
        if job.has_written() {
            return Err(Error::invariant("remap with buffered write intents"));
        }

        let now = Instant::now();
        let mut fraction = match self.last_remap {
            Some(last) => now.duration_since(last).as_secs_f64() / self.sweep_period.as_secs_f64(),
            None => 1.0,
        };
        if self.always_remap {
            fraction = 1.0;
        }
        self.last_remap = Some(now);

        let files = registry.shared();
        let sz = files.len();
        if sz == 0 {
            return Ok(RemapSweep::default());
        }

        let pressure = job.private_map_bytes() as f64 / self.budget as f64;
        if pressure > fraction {
            fraction = pressure;
        }
        job.reset_private_map_bytes();

        let ntodo = files_to_visit(sz, fraction);
        let started_at = self.start_at % sz;
        self.start_at = (started_at + ntodo) % sz;

        let mut remapped = 0;
        for file in files.iter().cycle().skip(started_at).take(ntodo) {
            if file.will_need_remap() {
                file.remap_private_view()?;
                remapped += 1;
            }
        }
        debug!(started_at, visited = ntodo, remapped, files = sz, "remapped private views");
        Ok(RemapSweep {
            files: sz,
            visited: ntodo,
            remapped,
            started_at,
            fraction,
        })
    }
}

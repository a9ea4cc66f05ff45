//! Group commit cycles.
//!
//! Limited-locks cycle (preferred):
//!
//! ```text
//! global ExclusiveRead (bounded wait) -> commit mutex -> begin
//!   nothing written: notify, done
//!   files lock shared -> prepare section -> reset log
//! release global lock                     (writers run again)
//! journal write + fsync -> notify waiters -> apply to data files
//! ```
//!
//! Full cycle: the same steps with the caller's ExclusiveRead or
//! ExclusiveWrite held throughout, the log reset after the data-file write,
//! and a private-view remap at the end. A caller already in ExclusiveWrite
//! remaps inline; the background thread upgrades its ExclusiveRead first.

use std::sync::atomic::Ordering;
use std::time::Instant;

use mmj_concurrency::{GlobalLockGuard, OperationContext};
use mmj_core::{Error, LockMode, Result};
use mmj_durability::{prepare_section, raw_payload, DataFileWriter};
use mmj_storage::FilesShared;
use tracing::{debug, trace};

use crate::engine::EngineShared;

/// Which path a background cycle took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleKind {
    /// Limited-locks cycle without remap
    LimitedLocks,
    /// Full cycle with remap
    Full,
}

impl EngineShared {
    /// Background cycle: limited locks unless a remap is due.
    pub(crate) fn background_group_commit(&self) -> Result<()> {
        let kind = self.background_cycle()?;
        trace!(?kind, "background cycle done");
        Ok(())
    }

    fn background_cycle(&self) -> Result<CycleKind> {
        let ctx = OperationContext::new(self.global_lock.clone());
        let n = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let remap_due = self.job.private_map_bytes() >= self.config.uncommitted_bytes_limit
            || n % self.config.remap_every_n as u64 == 0
            || self.config.always_remap;
        if !remap_due {
            let committed = self
                .group_commit_with_limited_locks(&ctx)
                .map_err(|e| self.fatal.abort_on_fatal("limited-locks group commit", e))?;
            if committed {
                return Ok(CycleKind::LimitedLocks);
            }
            debug!("limited-locks commit timed out, running a full cycle");
        }

        // take the write lock to stop greed by new writers, then work in
        // ExclusiveRead and upgrade only for the remap
        let mut global = ctx.lock(LockMode::ExclusiveWrite)?;
        global.downgrade()?;
        self.group_commit(&ctx, Some(&mut global))
            .map_err(|e| self.fatal.abort_on_fatal("group commit", e))?;
        Ok(CycleKind::Full)
    }

    pub(crate) fn group_commit_with_limited_locks(&self, ctx: &OperationContext) -> Result<bool> {
        self.check_not_failed()?;
        if ctx.lock_state().is_locked() {
            return Err(Error::invariant(format!(
                "limited-locks commit called holding {}",
                ctx.lock_state().mode().name()
            )));
        }
        let Some(global) =
            ctx.try_lock_for(LockMode::ExclusiveRead, self.config.limited_lock_timeout())?
        else {
            return Ok(false);
        };

        let mut guard = self.commit.lock();
        let state = &mut *guard;
        self.job.committing_begin();
        if !self.job.has_written() {
            self.job.committing_notify_committed();
            return Ok(true);
        }

        let files = self.registry.shared();
        let started = Instant::now();
        let pending = self.job.take_for_commit();
        let prepared = prepare_section(
            &mut state.builder,
            &pending,
            &files,
            state.journal.next_seq(),
        )?;
        let prep_micros = started.elapsed().as_micros() as u64;
        let builder_len = state.builder.len();

        self.job.committing_reset();
        drop(global);
        // other threads may write again from here

        let started = Instant::now();
        let journaled = state.journal.write_section(&state.builder)?;
        let journal_micros = started.elapsed().as_micros() as u64;
        check_builder(builder_len, state.builder.len())?;

        self.job.committing_notify_committed();

        let started = Instant::now();
        let applied = DataFileWriter::apply(raw_payload(&state.builder, &prepared), &files)?;
        let data_micros = started.elapsed().as_micros() as u64;
        check_builder(builder_len, state.builder.len())?;
        state.applied_seq = prepared.seq;
        state.builder.reset();

        self.stats.record(|w| {
            w.commits += 1;
            w.journaled_bytes += journaled.bytes_written as u64;
            w.uncompressed_bytes += prepared.section_len as u64;
            w.write_to_data_files_bytes += applied.bytes as u64;
            w.prep_log_buffer_micros += prep_micros;
            w.write_to_journal_micros += journal_micros;
            w.write_to_data_files_micros += data_micros;
        });
        trace!(seq = prepared.seq, writes = applied.writes, "limited-locks commit done");
        Ok(true)
    }

    /// Full cycle. `upgrade` is the background thread's ExclusiveRead guard,
    /// upgraded for the remap.
    pub(crate) fn group_commit(
        &self,
        ctx: &OperationContext,
        upgrade: Option<&mut GlobalLockGuard<'_>>,
    ) -> Result<()> {
        self.check_not_failed()?;
        if !ctx.lock_state().is_locked_for_committing() {
            return Err(Error::invariant(format!(
                "group commit called holding {}",
                ctx.lock_state().mode().name()
            )));
        }

        {
            let mut guard = self.commit.lock();
            let state = &mut *guard;
            self.job.committing_begin();
            if !self.job.has_written() {
                self.job.committing_notify_committed();
            } else {
                let files = self.registry.shared();
                let started = Instant::now();
                let pending = self.job.take_for_commit();
                let prepared = prepare_section(
                    &mut state.builder,
                    &pending,
                    &files,
                    state.journal.next_seq(),
                )?;
                let prep_micros = started.elapsed().as_micros() as u64;
                let builder_len = state.builder.len();

                let started = Instant::now();
                let journaled = state.journal.write_section(&state.builder)?;
                let journal_micros = started.elapsed().as_micros() as u64;
                check_builder(builder_len, state.builder.len())?;

                self.job.committing_notify_committed();

                let started = Instant::now();
                let applied =
                    DataFileWriter::apply(raw_payload(&state.builder, &prepared), &files)?;
                let data_micros = started.elapsed().as_micros() as u64;
                if self.config.paranoid_checks {
                    check_views_match(&files)?;
                }

                state.applied_seq = prepared.seq;
                self.job.committing_reset();
                state.builder.reset();

                self.stats.record(|w| {
                    w.commits += 1;
                    w.journaled_bytes += journaled.bytes_written as u64;
                    w.uncompressed_bytes += prepared.section_len as u64;
                    w.write_to_data_files_bytes += applied.bytes as u64;
                    w.prep_log_buffer_micros += prep_micros;
                    w.write_to_journal_micros += journal_micros;
                    w.write_to_data_files_micros += data_micros;
                });
            }
        }

        if self.job.has_written() {
            return Err(Error::invariant("intent log not empty after a full commit"));
        }
        if ctx.lock_state().is_w() {
            self.stats.record(|w| w.commits_in_write_lock += 1);
            self.remap(ctx)?;
        } else if let Some(global) = upgrade {
            trace!("upgrading to exclusive write for remap");
            global.upgrade()?;
            self.remap(ctx)?;
        }
        Ok(())
    }

    fn remap(&self, ctx: &OperationContext) -> Result<()> {
        let started = Instant::now();
        let sweep =
            self.remapper
                .lock()
                .remap_private_views(ctx.lock_state(), &self.job, &self.registry)?;
        let micros = started.elapsed().as_micros() as u64;
        self.stats.record(|w| {
            w.remap_sweeps += 1;
            w.remap_private_view_micros += micros;
        });
        trace!(visited = sweep.visited, remapped = sweep.remapped, "remap sweep");
        Ok(())
    }

    fn check_not_failed(&self) -> Result<()> {
        if self.fatal.has_failed() {
            return Err(Error::invariant("durability engine stopped after a fatal error"));
        }
        Ok(())
    }
}

// Nobody may touch the builder while a cycle uses it; a change means the
// locking is wrong.
fn check_builder(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::invariant(format!(
            "log builder changed during commit: {} -> {} bytes",
            expected, actual
        )));
    }
    Ok(())
}

fn check_views_match(files: &FilesShared<'_>) -> Result<()> {
    for file in files.iter() {
        if let Some((low, high)) = file.views_mismatch() {
            return Err(Error::invariant(format!(
                "views mismatch in {} {:#x}..{:#x} len {}: written data does not match the in-memory view, missing write intent?",
                file.name(),
                low,
                high,
                high - low + 1
            )));
        }
    }
    Ok(())
}

//! The durability engine.
//!
//! One [`DurabilityEngine`] owns the intent log, the journal, the remapper,
//! the statistics and the background commit thread. Foreground threads use
//! it through an [`OperationContext`] obtained from
//! [`DurabilityEngine::context`].
//!
//! # Lifecycle
//!
//! ```text
//! open()      recover the journal, open a fresh journal file
//! start()     spawn the background commit thread
//! ...         declare intents, write private views, commit
//! shutdown()  stop the thread after a final commit and data-file flush
//! ```

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mmj_concurrency::{CommitJob, GlobalLock, OperationContext, ShutdownSignal};
use mmj_core::{DurOp, DurabilityConfig, Error, FileId, LockMode, Result, WriteIntent};
use mmj_durability::{DataFileWriter, JournalWriter, LsnFile, RecoveryReplayer, RecoveryResult};
use mmj_storage::{AlignedBuilder, DurableMappedFile, MappedFileRegistry};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::background::DurabilityBackgroundThread;
use crate::early_commit::{decide, EarlyCommitAction, SYSTEM_NAMESPACES};
use crate::fatal::{FatalHandler, FatalSupervisor};
use crate::remap::PrivateViewRemapper;
use crate::stats::{DurStats, MetricsSink, StatsWindow};

/// State guarded by the commit mutex: only one cycle at a time.
pub(crate) struct CommitState {
    pub(crate) builder: AlignedBuilder,
    pub(crate) journal: JournalWriter,
    /// Highest section applied to the shared views
    pub(crate) applied_seq: u64,
}

/// Everything the foreground API and the background thread share.
pub(crate) struct EngineShared {
    pub(crate) config: DurabilityConfig,
    pub(crate) registry: Arc<MappedFileRegistry>,
    pub(crate) global_lock: Arc<GlobalLock>,
    pub(crate) job: CommitJob,
    pub(crate) commit: Mutex<CommitState>,
    pub(crate) remapper: Mutex<PrivateViewRemapper>,
    pub(crate) stats: DurStats,
    pub(crate) fatal: FatalSupervisor,
    pub(crate) shutdown: ShutdownSignal,
    /// Background cycles run, drives the every-Nth remap
    pub(crate) cycles: AtomicU64,
    pub(crate) kick: Mutex<bool>,
    pub(crate) kicked: Condvar,
}

impl EngineShared {
    /// Wake the background thread early.
    pub(crate) fn kick(&self) {
        *self.kick.lock() = true;
        self.kicked.notify_all();
    }

    pub(crate) fn commit_now(&self, ctx: &OperationContext) -> Result<()> {
        self.stats.record(|w| w.early_commits += 1);
        self.group_commit(ctx, None)
            .map_err(|e| self.fatal.abort_on_fatal("group commit", e))
    }

    /// msync every data file, then record the last applied section in the
    /// lsn file and drop journal files it covers.
    pub(crate) fn flush_data_files(&self) -> Result<u64> {
        let seq = self.commit.lock().applied_seq;
        {
            let files = self.registry.shared();
            DataFileWriter::flush_all(&files)?;
        }
        LsnFile::new(&self.config.journal_dir()).write(seq)?;
        let removed = self.commit.lock().journal.remove_files_covered_by(seq)?;
        debug!(seq, removed, "flushed data files");
        Ok(seq)
    }
}

/// Builder for [`DurabilityEngine`].
pub struct EngineBuilder {
    config: DurabilityConfig,
    fatal_handler: Option<FatalHandler>,
    metrics_sink: Option<Box<dyn MetricsSink>>,
}

impl EngineBuilder {
    /// Replace the default fatal handler (process abort).
    pub fn fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.fatal_handler = Some(handler);
        self
    }

    /// Publish stats windows to `sink`.
    pub fn metrics_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Recover and open the engine without starting the background thread.
    pub fn open(self) -> Result<DurabilityEngine> {
        let config = self.config;
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(config.journal_dir())?;

        let registry = Arc::new(MappedFileRegistry::new(&config.data_dir));
        let recovery = RecoveryReplayer::new(&config, &registry).recover()?;
        let journal = JournalWriter::open(&config, recovery.last_seq)?;

        let fatal = match self.fatal_handler {
            Some(handler) => FatalSupervisor::with_handler(handler),
            None => FatalSupervisor::new(),
        };
        let shared = EngineShared {
            registry,
            global_lock: Arc::new(GlobalLock::new()),
            job: CommitJob::new(),
            commit: Mutex::new(CommitState {
                builder: AlignedBuilder::with_capacity(config.builder_capacity),
                journal,
                applied_seq: recovery.last_seq,
            }),
            remapper: Mutex::new(PrivateViewRemapper::new(&config)),
            stats: DurStats::new(config.stats_interval(), self.metrics_sink),
            fatal,
            shutdown: ShutdownSignal::new(),
            cycles: AtomicU64::new(0),
            kick: Mutex::new(false),
            kicked: Condvar::new(),
            config,
        };
        info!(
            data_dir = %shared.config.data_dir.display(),
            last_seq = recovery.last_seq,
            "durability engine open"
        );
        Ok(DurabilityEngine {
            shared: Arc::new(shared),
            recovery,
            background: Mutex::new(None),
        })
    }
}

/// Write-ahead journaling over memory-mapped data files.
pub struct DurabilityEngine {
    shared: Arc<EngineShared>,
    recovery: RecoveryResult,
    background: Mutex<Option<DurabilityBackgroundThread>>,
}

impl DurabilityEngine {
    /// Builder with `config`.
    pub fn builder(config: DurabilityConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            fatal_handler: None,
            metrics_sink: None,
        }
    }

    /// Recover and open with default handlers; the background thread is not
    /// started.
    pub fn open(config: DurabilityConfig) -> Result<Self> {
        Self::builder(config).open()
    }

    /// Start the background commit thread.
    pub fn start(&self) -> Result<()> {
        let mut background = self.background.lock();
        if background.is_some() {
            return Err(Error::invariant("background thread already running"));
        }
        *background = Some(DurabilityBackgroundThread::spawn(Arc::clone(&self.shared))?);
        Ok(())
    }

    /// Stop the background thread, which finishes its iteration, commits
    /// and flushes the data files. Without a thread the final commit and
    /// flush run here.
    pub fn shutdown(&self) -> Result<()> {
        if self.shared.shutdown.is_requested() && self.background.lock().is_none() {
            return Ok(());
        }
        self.shared.shutdown.request();
        self.shared.kick();
        let thread = self.background.lock().take();
        match thread {
            Some(thread) => thread.join(),
            None => {
                self.shared.background_group_commit()?;
                self.shared.flush_data_files()?;
                Ok(())
            }
        }
    }

    /// Result of the recovery run at open.
    pub fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Configuration in use.
    pub fn config(&self) -> &DurabilityConfig {
        &self.shared.config
    }

    /// The data file registry.
    pub fn registry(&self) -> &Arc<MappedFileRegistry> {
        &self.shared.registry
    }

    /// A fresh context for the calling thread.
    pub fn context(&self) -> OperationContext {
        OperationContext::new(Arc::clone(&self.shared.global_lock))
    }

    /// The global lock.
    pub fn global_lock(&self) -> &Arc<GlobalLock> {
        &self.shared.global_lock
    }

    /// Declare that `len` bytes at `offset` of `file` are about to change.
    ///
    /// The caller must hold SharedWrite or ExclusiveWrite.
    pub fn declare_write_intent(
        &self,
        ctx: &OperationContext,
        file: FileId,
        offset: u64,
        len: u32,
    ) -> Result<()> {
        require_writer(ctx)?;
        self.shared.registry.get(file)?.check_bounds(offset, len as u64)?;
        self.shared.job.note_write(WriteIntent::new(file, offset, len));
        Ok(())
    }

    /// Declare an intent and hand back the file for writing its private view.
    pub fn writing(
        &self,
        ctx: &OperationContext,
        file: FileId,
        offset: u64,
        len: u32,
    ) -> Result<Arc<DurableMappedFile>> {
        require_writer(ctx)?;
        let mapped = self.shared.registry.get(file)?;
        mapped.check_bounds(offset, len as u64)?;
        self.shared.job.note_write(WriteIntent::new(file, offset, len));
        Ok(mapped)
    }

    /// Declare an intent for `data` at `offset` and write it to the private view.
    pub fn write_bytes(
        &self,
        ctx: &OperationContext,
        file: FileId,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| Error::invariant(format!("write of {} bytes", data.len())))?;
        self.writing(ctx, file, offset, len)?
            .write_private(offset, data)
    }

    /// Create and map a data file, journaling the creation.
    ///
    /// The file exists on disk before the op is journaled; recovery recreates
    /// it if the crash came first.
    pub fn created_file(
        &self,
        ctx: &OperationContext,
        name: &str,
        len: u64,
    ) -> Result<Arc<DurableMappedFile>> {
        require_writer(ctx)?;
        let file = self.shared.registry.create_file(name, len)?;
        self.shared.job.note_op(DurOp::FileCreated {
            file: file.id(),
            name: name.to_string(),
            len,
        });
        Ok(file)
    }

    /// Map an existing data file.
    pub fn open_file(&self, name: &str) -> Result<Arc<DurableMappedFile>> {
        self.shared.registry.open_file(name)
    }

    /// Buffered intent bytes.
    pub fn bytes(&self) -> usize {
        self.shared.job.bytes()
    }

    /// Whether anything awaits a commit.
    pub fn has_written(&self) -> bool {
        self.shared.job.has_written()
    }

    /// Commit cycles started so far.
    pub fn commit_epoch(&self) -> u64 {
        self.shared.job.commit_epoch()
    }

    /// Whether the buffered bytes exceed the budget.
    pub fn is_commit_needed(&self) -> bool {
        self.shared.job.bytes() > self.shared.config.uncommitted_bytes_limit
    }

    /// Block until the journal write of a cycle started after this call.
    ///
    /// The context must hold no lock: a full cycle takes the global write
    /// lock and would wait on the caller forever.
    pub fn await_commit(&self, ctx: &OperationContext) -> Result<()> {
        if ctx.lock_state().is_locked() {
            return Err(Error::invariant(format!(
                "await_commit while holding {}",
                ctx.lock_state().mode().name()
            )));
        }
        self.shared.kick();
        self.shared.job.await_commit();
        Ok(())
    }

    /// Commit immediately from the caller's lock state.
    ///
    /// The caller must hold ExclusiveRead or ExclusiveWrite.
    pub fn commit_now(&self, ctx: &OperationContext) -> Result<()> {
        self.shared.commit_now(ctx)
    }

    /// Commit early if the budget is exceeded (or `force`) and the caller's
    /// lock state allows it. Returns whether a commit ran.
    pub fn commit_if_needed(&self, ctx: &OperationContext, force: bool) -> Result<bool> {
        let limit = self.shared.config.uncommitted_bytes_limit;
        if self.shared.job.bytes() < limit && !force {
            return Ok(false);
        }
        match decide(ctx.lock_state().mode()) {
            EarlyCommitAction::AcquireAndCommit => {
                let _global = ctx.lock(LockMode::ExclusiveRead)?;
                if self.shared.job.bytes() < limit && !force {
                    // someone else committed while we waited
                    return Ok(false);
                }
                self.commit_now(ctx)?;
                Ok(true)
            }
            EarlyCommitAction::TryUpgrade => {
                for ns in SYSTEM_NAMESPACES {
                    if ctx.lock_state().is_at_least_read_locked(ns) {
                        debug!(ns, "not committing early inside a system namespace lock");
                        return Ok(false);
                    }
                }
                debug!("early commit upgrading shared write to exclusive write");
                match ctx.try_upgrade_to_exclusive(self.shared.config.upgrade_timeout()) {
                    Some(_exclusive) => {
                        self.commit_now(ctx)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            EarlyCommitAction::CommitInline => {
                self.commit_now(ctx)?;
                Ok(true)
            }
            EarlyCommitAction::Decline => Ok(false),
        }
    }

    /// One limited-locks cycle; false when the global read lock could not
    /// be had in time. The context must hold no lock.
    pub fn group_commit_with_limited_locks(&self, ctx: &OperationContext) -> Result<bool> {
        self.shared
            .group_commit_with_limited_locks(ctx)
            .map_err(|e| self.shared.fatal.abort_on_fatal("limited-locks group commit", e))
    }

    /// Run one background cycle from the calling thread.
    pub fn run_commit_cycle(&self) -> Result<()> {
        self.shared.background_group_commit()
    }

    /// msync the data files and advance the lsn. Returns the lsn written.
    pub fn flush_data_files(&self) -> Result<u64> {
        self.shared
            .flush_data_files()
            .map_err(|e| self.shared.fatal.abort_on_fatal("flush data files", e))
    }

    /// Commit, flush the data files and empty the journal.
    ///
    /// The caller must hold the global write lock.
    pub fn sync_data_and_truncate_journal(&self, ctx: &OperationContext) -> Result<()> {
        if !ctx.lock_state().is_w() {
            return Err(Error::invariant(
                "sync and truncate requires the global write lock",
            ));
        }
        // a background cycle may still be writing outside the global lock
        drop(self.shared.commit.lock());
        self.commit_now(ctx)?;
        self.flush_data_files()?;
        let removed = self.shared.commit.lock().journal.truncate()?;
        info!(removed, "journal truncated");
        Ok(())
    }

    /// Check that a file may close: nothing may be pending unless the
    /// process is shutting down.
    pub fn closing_file_notification(&self) -> Result<()> {
        if !self.shared.job.has_written() {
            return Ok(());
        }
        if self.shared.shutdown.is_requested() {
            warn!("files are closing with writes pending during shutdown");
            Ok(())
        } else {
            Err(self.shared.fatal.abort_on_fatal(
                "closing file",
                Error::invariant("file is closing while there are unwritten changes"),
            ))
        }
    }

    /// Unmap a data file. Requires the global write lock.
    pub fn close_file(&self, ctx: &OperationContext, file: FileId) -> Result<()> {
        if !ctx.lock_state().is_w() {
            return Err(Error::invariant("closing a file requires the global write lock"));
        }
        self.closing_file_notification()?;
        let closed = self.shared.registry.exclusive().remove(file)?;
        closed.flush()?;
        debug!(file = %file, name = closed.name(), "closed data file");
        Ok(())
    }

    /// Last complete stats window.
    pub fn stats(&self) -> StatsWindow {
        self.shared.stats.last_window()
    }

    /// Stats since startup.
    pub fn stats_totals(&self) -> StatsWindow {
        self.shared.stats.totals()
    }

    /// Whether a fatal error was reported.
    pub fn has_failed(&self) -> bool {
        self.shared.fatal.has_failed()
    }

    /// Number of background cycles run.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }
}

impl Drop for DurabilityEngine {
    fn drop(&mut self) {
        if self.shared.fatal.has_failed() {
            return;
        }
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "durability engine shutdown failed");
        }
    }
}

fn require_writer(ctx: &OperationContext) -> Result<()> {
    match ctx.lock_state().mode() {
        LockMode::SharedWrite | LockMode::ExclusiveWrite => Ok(()),
        other => Err(Error::invariant(format!(
            "write intent declared while holding {}",
            other.name()
        ))),
    }
}

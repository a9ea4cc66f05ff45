//! The write intent log.
//!
//! Foreground threads append intents and durable ops while holding a
//! SharedWrite or ExclusiveWrite lock. The committer reads and resets the log
//! while holding ExclusiveRead or ExclusiveWrite, so appends and the reset
//! step never interleave. The inner mutex only serializes concurrent
//! appenders.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use mmj_core::{DurOp, WriteIntent};
use parking_lot::Mutex;
use tracing::trace;

use crate::notify::CommitNotifier;

/// Intents and ops captured since the last reset.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingWrites {
    /// Byte ranges to journal, in declaration order.
    pub intents: Vec<WriteIntent>,
    /// Non-byte-range operations, replayed before the intents.
    pub ops: Vec<DurOp>,
}

impl PendingWrites {
    /// Nothing captured.
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty() && self.ops.is_empty()
    }

    /// Sum of intent lengths.
    pub fn intent_bytes(&self) -> usize {
        self.intents.iter().map(|i| i.len as usize).sum()
    }

    /// Record an intent, merging it into the previous one when they touch.
    ///
    /// Returns the number of bytes the log grew by.
    fn push_intent(&mut self, intent: WriteIntent) -> usize {
        if let Some(last) = self.intents.last_mut() {
            if last.file == intent.file && last.touches(&intent) {
                let start = last.offset.min(intent.offset);
                let end = last.end().max(intent.end());
                let old = last.len as u64;
                let merged = end - start;
                if merged <= u32::MAX as u64 {
                    last.offset = start;
                    last.len = merged as u32;
                    return (merged - old) as usize;
                }
            }
        }
        self.intents.push(intent);
        intent.len as usize
    }
}

/// Process-wide log of writes awaiting a commit.
#[derive(Debug, Default)]
pub struct CommitJob {
    pending: Mutex<PendingWrites>,
    bytes: AtomicUsize,
    has_written: AtomicBool,
    private_map_bytes: AtomicUsize,
    commit_epoch: AtomicU64,
    commit_number: AtomicU64,
    notifier: CommitNotifier,
}

impl CommitJob {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write intent.
    pub fn note_write(&self, intent: WriteIntent) {
        if intent.len == 0 {
            return;
        }
        let grew = self.pending.lock().push_intent(intent);
        self.bytes.fetch_add(grew, Ordering::AcqRel);
        self.private_map_bytes
            .fetch_add(intent.len as usize, Ordering::AcqRel);
        self.has_written.store(true, Ordering::Release);
        trace!(file = %intent.file, offset = intent.offset, len = intent.len, "write intent");
    }

    /// Record a durable operation.
    pub fn note_op(&self, op: DurOp) {
        self.pending.lock().ops.push(op);
        self.has_written.store(true, Ordering::Release);
    }

    /// Bytes buffered for the next commit.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Whether anything is buffered.
    pub fn has_written(&self) -> bool {
        self.has_written.load(Ordering::Acquire)
    }

    /// Start a commit cycle: bump the epoch and take the notification ticket
    /// this cycle will satisfy. Returns the new epoch.
    pub fn committing_begin(&self) -> u64 {
        self.commit_number
            .store(self.notifier.now(), Ordering::Release);
        self.commit_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move the captured writes out for section preparation.
    pub fn take_for_commit(&self) -> PendingWrites {
        mem::take(&mut *self.pending.lock())
    }

    /// Inspect the captured writes without taking them.
    pub fn with_pending<R>(&self, f: impl FnOnce(&PendingWrites) -> R) -> R {
        f(&self.pending.lock())
    }

    /// Clear the log so new writes can accumulate.
    pub fn committing_reset(&self) {
        {
            let mut pending = self.pending.lock();
            pending.intents.clear();
            pending.ops.clear();
        }
        self.bytes.store(0, Ordering::Release);
        self.has_written.store(false, Ordering::Release);
    }

    /// Wake everyone waiting on the journal write of this cycle.
    pub fn committing_notify_committed(&self) {
        self.notifier
            .notify_all(self.commit_number.load(Ordering::Acquire));
    }

    /// Block until a journal write that started after this call completes.
    pub fn await_commit(&self) {
        self.notifier.await_beyond_now();
    }

    /// Threads blocked in [`await_commit`](Self::await_commit).
    pub fn n_waiting(&self) -> usize {
        self.notifier.n_waiting()
    }

    /// Number of commit cycles started.
    pub fn commit_epoch(&self) -> u64 {
        self.commit_epoch.load(Ordering::Acquire)
    }

    /// Bytes written to private views since the last remap sweep.
    pub fn private_map_bytes(&self) -> usize {
        self.private_map_bytes.load(Ordering::Acquire)
    }

    /// Called after a remap sweep.
    pub fn reset_private_map_bytes(&self) {
        self.private_map_bytes.store(0, Ordering::Release);
    }

    /// The notifier shared with waiters.
    pub fn notifier(&self) -> &CommitNotifier {
        &self.notifier
    }
}

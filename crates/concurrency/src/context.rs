//! Per-thread operation context and lock bookkeeping.
//!
//! An [`OperationContext`] belongs to one thread. It records which global
//! mode the thread holds and which namespaces it has locked, so the engine
//! can decide what an early commit is allowed to do from the caller's
//! position.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use mmj_core::{Error, LockMode, Result};

use crate::lock::GlobalLock;

/// Lock bookkeeping of one thread.
#[derive(Debug, Default)]
pub struct LockState {
    mode: Cell<LockMode>,
    namespaces: RefCell<Vec<String>>,
}

impl LockState {
    /// Current global mode.
    pub fn mode(&self) -> LockMode {
        self.mode.get()
    }

    /// Whether any global mode is held.
    pub fn is_locked(&self) -> bool {
        self.mode() != LockMode::Unlocked
    }

    /// Holding the global write lock.
    pub fn is_w(&self) -> bool {
        self.mode() == LockMode::ExclusiveWrite
    }

    /// Holding a mode that keeps writers out, as a commit requires.
    pub fn is_locked_for_committing(&self) -> bool {
        matches!(
            self.mode(),
            LockMode::ExclusiveRead | LockMode::ExclusiveWrite
        )
    }

    /// Whether `ns` is locked (in any mode) by this thread, or the thread
    /// holds a whole-store lock.
    pub fn is_at_least_read_locked(&self, ns: &str) -> bool {
        self.is_locked_for_committing() || self.namespaces.borrow().iter().any(|n| n == ns)
    }

    fn set(&self, mode: LockMode) {
        self.mode.set(mode);
    }
}

/// Context of one operation thread.
pub struct OperationContext {
    lock: Arc<GlobalLock>,
    state: LockState,
}

impl OperationContext {
    /// A context with no locks held.
    pub fn new(lock: Arc<GlobalLock>) -> Self {
        OperationContext {
            lock,
            state: LockState::default(),
        }
    }

    /// The thread's lock bookkeeping.
    pub fn lock_state(&self) -> &LockState {
        &self.state
    }

    /// The global lock this context acquires.
    pub fn global_lock(&self) -> &Arc<GlobalLock> {
        &self.lock
    }

    /// Acquire the global lock in `mode`, blocking.
    pub fn lock(&self, mode: LockMode) -> Result<GlobalLockGuard<'_>> {
        self.check_unlocked(mode)?;
        self.lock.acquire(mode);
        self.state.set(mode);
        Ok(GlobalLockGuard { ctx: self })
    }

    /// Acquire the global lock in `mode` within `timeout`.
    pub fn try_lock_for(
        &self,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Option<GlobalLockGuard<'_>>> {
        self.check_unlocked(mode)?;
        if !self.lock.try_acquire_for(mode, timeout) {
            return Ok(None);
        }
        self.state.set(mode);
        Ok(Some(GlobalLockGuard { ctx: self }))
    }

    /// Temporarily upgrade SharedWrite to ExclusiveWrite.
    ///
    /// Returns `None` when the upgrade could not be had in `timeout`; the
    /// thread keeps its SharedWrite lock either way. Dropping the returned
    /// guard downgrades back to SharedWrite.
    pub fn try_upgrade_to_exclusive(&self, timeout: Duration) -> Option<UpgradeGuard<'_>> {
        if self.state.mode() != LockMode::SharedWrite {
            return None;
        }
        if !self.lock.try_upgrade_shared_write(timeout) {
            return None;
        }
        self.state.set(LockMode::ExclusiveWrite);
        Some(UpgradeGuard { ctx: self })
    }

    /// Record that namespace `ns` is locked by this thread.
    ///
    /// Namespace locks are granted by the caller's own lock manager; the
    /// context only remembers them so durability decisions can respect them.
    pub fn lock_namespace(&self, ns: &str) -> Result<NamespaceGuard<'_>> {
        if !matches!(
            self.state.mode(),
            LockMode::SharedRead | LockMode::SharedWrite
        ) {
            return Err(Error::invariant(format!(
                "namespace {} locked without an intent lock (holding {})",
                ns,
                self.state.mode().name()
            )));
        }
        self.state.namespaces.borrow_mut().push(ns.to_string());
        Ok(NamespaceGuard {
            ctx: self,
            ns: ns.to_string(),
        })
    }

    fn check_unlocked(&self, wanted: LockMode) -> Result<()> {
        if self.state.is_locked() {
            return Err(Error::invariant(format!(
                "recursive global lock: want {} while holding {}",
                wanted.name(),
                self.state.mode().name()
            )));
        }
        Ok(())
    }
}

/// Holds the global lock; releases whatever mode is current on drop.
pub struct GlobalLockGuard<'a> {
    ctx: &'a OperationContext,
}

impl GlobalLockGuard<'_> {
    /// Current mode of the guard.
    pub fn mode(&self) -> LockMode {
        self.ctx.state.mode()
    }

    /// ExclusiveWrite -> ExclusiveRead.
    pub fn downgrade(&mut self) -> Result<()> {
        if self.mode() != LockMode::ExclusiveWrite {
            return Err(Error::invariant("downgrade requires exclusive write"));
        }
        self.ctx.lock.downgrade_to_exclusive_read();
        self.ctx.state.set(LockMode::ExclusiveRead);
        Ok(())
    }

    /// ExclusiveRead -> ExclusiveWrite, blocking.
    pub fn upgrade(&mut self) -> Result<()> {
        if self.mode() != LockMode::ExclusiveRead {
            return Err(Error::invariant("upgrade requires exclusive read"));
        }
        self.ctx.lock.upgrade_exclusive_read()?;
        self.ctx.state.set(LockMode::ExclusiveWrite);
        Ok(())
    }
}

impl Drop for GlobalLockGuard<'_> {
    fn drop(&mut self) {
        let mode = self.ctx.state.mode();
        self.ctx.lock.release(mode);
        self.ctx.state.set(LockMode::Unlocked);
        self.ctx.state.namespaces.borrow_mut().clear();
    }
}

/// Scoped SharedWrite -> ExclusiveWrite upgrade.
pub struct UpgradeGuard<'a> {
    ctx: &'a OperationContext,
}

impl Drop for UpgradeGuard<'_> {
    fn drop(&mut self) {
        self.ctx.lock.downgrade_to_shared_write();
        self.ctx.state.set(LockMode::SharedWrite);
    }
}

/// Namespace bookkeeping entry; removed on drop.
pub struct NamespaceGuard<'a> {
    ctx: &'a OperationContext,
    ns: String,
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        let mut namespaces = self.ctx.state.namespaces.borrow_mut();
        if let Some(pos) = namespaces.iter().rposition(|n| *n == self.ns) {
            namespaces.remove(pos);
        }
    }
}

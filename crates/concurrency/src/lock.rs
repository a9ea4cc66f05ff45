//! The global lock.
//!
//! Four modes (see [`LockMode`]) with the usual compatibility matrix:
//!
//! ```text
//!            SharedRead SharedWrite ExclusiveRead ExclusiveWrite
//! SharedRead      ok        ok           ok            -
//! SharedWrite     ok        ok           -             -
//! ExclRead        ok        -            ok            -
//! ExclWrite       -         -            -             -
//! ```
//!
//! Exclusive requests are greedy: while a thread waits for ExclusiveWrite (or
//! upgrades to it) no new shared grant is made, and while a thread waits for
//! ExclusiveRead no new SharedWrite is granted. The commit thread relies on
//! this so writers cannot starve it.
//!
//! This type only counts holders; which mode a given thread holds is tracked
//! by its [`OperationContext`](crate::OperationContext).

use std::time::{Duration, Instant};

use mmj_core::{Error, LockMode, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Holders {
    shared_read: usize,
    shared_write: usize,
    exclusive_read: usize,
    exclusive_write: bool,
    waiting_writers: usize,
    waiting_readers: usize,
    upgrading: bool,
}

impl Holders {
    fn grantable(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Unlocked => true,
            LockMode::SharedRead => !self.exclusive_write && self.waiting_writers == 0,
            LockMode::SharedWrite => {
                !self.exclusive_write
                    && self.exclusive_read == 0
                    && self.waiting_writers == 0
                    && self.waiting_readers == 0
            }
            LockMode::ExclusiveRead => {
                !self.exclusive_write && self.shared_write == 0 && self.waiting_writers == 0
            }
            LockMode::ExclusiveWrite => {
                !self.exclusive_write
                    && self.shared_read == 0
                    && self.shared_write == 0
                    && self.exclusive_read == 0
            }
        }
    }

    fn add(&mut self, mode: LockMode) {
        match mode {
            LockMode::Unlocked => {}
            LockMode::SharedRead => self.shared_read += 1,
            LockMode::SharedWrite => self.shared_write += 1,
            LockMode::ExclusiveRead => self.exclusive_read += 1,
            LockMode::ExclusiveWrite => self.exclusive_write = true,
        }
    }

    fn remove(&mut self, mode: LockMode) {
        match mode {
            LockMode::Unlocked => {}
            LockMode::SharedRead => self.shared_read -= 1,
            LockMode::SharedWrite => self.shared_write -= 1,
            LockMode::ExclusiveRead => self.exclusive_read -= 1,
            LockMode::ExclusiveWrite => self.exclusive_write = false,
        }
    }

    fn wait_counter(&mut self, mode: LockMode) -> Option<&mut usize> {
        match mode {
            LockMode::ExclusiveWrite => Some(&mut self.waiting_writers),
            LockMode::ExclusiveRead => Some(&mut self.waiting_readers),
            _ => None,
        }
    }
}

/// Multi-mode global lock.
#[derive(Debug, Default)]
pub struct GlobalLock {
    holders: Mutex<Holders>,
    changed: Condvar,
}

impl GlobalLock {
    /// An unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `mode` is granted.
    pub fn acquire(&self, mode: LockMode) {
        let mut h = self.holders.lock();
        if !h.grantable(mode) {
            if let Some(c) = h.wait_counter(mode) {
                *c += 1;
            }
            while !h.grantable(mode) {
                self.changed.wait(&mut h);
            }
            if let Some(c) = h.wait_counter(mode) {
                *c -= 1;
            }
        }
        h.add(mode);
    }

    /// Try to get `mode` within `timeout`.
    pub fn try_acquire_for(&self, mode: LockMode, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut h = self.holders.lock();
        if h.grantable(mode) {
            h.add(mode);
            return true;
        }
        if let Some(c) = h.wait_counter(mode) {
            *c += 1;
        }
        let mut granted = true;
        while !h.grantable(mode) {
            if self.changed.wait_until(&mut h, deadline).timed_out()
                && !h.grantable(mode)
            {
                granted = false;
                break;
            }
        }
        if let Some(c) = h.wait_counter(mode) {
            *c -= 1;
        }
        if granted {
            h.add(mode);
        } else {
            // our wait counter may have been holding back shared grants
            self.changed.notify_all();
        }
        granted
    }

    /// Release one hold of `mode`.
    pub fn release(&self, mode: LockMode) {
        let mut h = self.holders.lock();
        h.remove(mode);
        drop(h);
        self.changed.notify_all();
    }

    /// ExclusiveWrite -> ExclusiveRead. Never blocks.
    pub fn downgrade_to_exclusive_read(&self) {
        let mut h = self.holders.lock();
        debug_assert!(h.exclusive_write);
        h.exclusive_write = false;
        h.exclusive_read += 1;
        drop(h);
        self.changed.notify_all();
    }

    /// ExclusiveWrite -> SharedWrite. Never blocks.
    pub fn downgrade_to_shared_write(&self) {
        let mut h = self.holders.lock();
        debug_assert!(h.exclusive_write);
        h.exclusive_write = false;
        h.shared_write += 1;
        drop(h);
        self.changed.notify_all();
    }

    /// ExclusiveRead -> ExclusiveWrite, waiting for the other readers to leave.
    ///
    /// Only one thread may upgrade from ExclusiveRead at a time; a second
    /// concurrent upgrader is an invariant violation (it would deadlock).
    pub fn upgrade_exclusive_read(&self) -> Result<()> {
        let mut h = self.holders.lock();
        while h.upgrading {
            self.changed.wait(&mut h);
        }
        if h.exclusive_read == 0 {
            return Err(Error::invariant("upgrade without holding exclusive read"));
        }
        h.upgrading = true;
        h.waiting_writers += 1;
        while !(h.exclusive_read == 1 && h.shared_read == 0 && h.shared_write == 0) {
            self.changed.wait(&mut h);
        }
        h.waiting_writers -= 1;
        h.upgrading = false;
        h.exclusive_read = 0;
        h.exclusive_write = true;
        Ok(())
    }

    /// SharedWrite -> ExclusiveWrite within `timeout`.
    ///
    /// Gives up immediately if another upgrade is in progress, since two
    /// shared writers waiting for each other would never succeed. On failure
    /// the caller still holds SharedWrite.
    pub fn try_upgrade_shared_write(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut h = self.holders.lock();
        if h.upgrading || h.shared_write == 0 {
            return false;
        }
        h.upgrading = true;
        h.waiting_writers += 1;
        let mut granted = true;
        while !(h.shared_write == 1
            && h.shared_read == 0
            && h.exclusive_read == 0
            && !h.exclusive_write)
        {
            if self.changed.wait_until(&mut h, deadline).timed_out() {
                granted = h.shared_write == 1
                    && h.shared_read == 0
                    && h.exclusive_read == 0
                    && !h.exclusive_write;
                break;
            }
        }
        h.waiting_writers -= 1;
        h.upgrading = false;
        if granted {
            h.shared_write = 0;
            h.exclusive_write = true;
        }
        drop(h);
        self.changed.notify_all();
        granted
    }

    /// Holder counts as (shared_read, shared_write, exclusive_read, exclusive_write).
    pub fn holders(&self) -> (usize, usize, usize, bool) {
        let h = self.holders.lock();
        (h.shared_read, h.shared_write, h.exclusive_read, h.exclusive_write)
    }
}

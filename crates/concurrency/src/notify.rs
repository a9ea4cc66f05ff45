//! Ticket-based wakeup for threads waiting on a journal write.
//!
//! The committer takes a ticket with [`CommitNotifier::now`] before it starts
//! writing and hands the same ticket to [`CommitNotifier::notify_all`] when
//! the journal write is durable. A waiter takes its own ticket and sleeps until
//! a notification at or beyond it arrives, so a waiter that shows up after the
//! committer started writing waits for the following commit.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    last_returned: u64,
    last_done: u64,
    waiting: usize,
}

/// Wakes everyone waiting for a commit.
#[derive(Debug, Default)]
pub struct CommitNotifier {
    tickets: Mutex<Tickets>,
    done: Condvar,
}

impl CommitNotifier {
    /// A notifier with no tickets issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket.
    pub fn now(&self) -> u64 {
        let mut t = self.tickets.lock();
        t.last_returned += 1;
        t.last_returned
    }

    /// Block until a notification beyond the present moment.
    pub fn await_beyond_now(&self) {
        let mut t = self.tickets.lock();
        t.waiting += 1;
        t.last_returned += 1;
        let ticket = t.last_returned;
        while t.last_done < ticket {
            self.done.wait(&mut t);
        }
    }

    /// Wake every waiter whose ticket is at or below `when`.
    pub fn notify_all(&self, when: u64) {
        let mut t = self.tickets.lock();
        if when > t.last_done {
            t.last_done = when;
        }
        t.waiting = 0;
        drop(t);
        self.done.notify_all();
    }

    /// Threads waiting since the last notification.
    pub fn n_waiting(&self) -> usize {
        self.tickets.lock().waiting
    }

    /// Highest ticket notified so far.
    pub fn last_done(&self) -> u64 {
        self.tickets.lock().last_done
    }
}

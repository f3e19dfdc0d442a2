//! Multi-source join
//!
//! A consumer arms one slot per subscription against a shared `Mailbox`, then
//! waits once for all of them. Each slot is a single-use channel; the mailbox
//! counts outstanding arrivals and carries a failure flag set when any armed
//! source loses its publisher.

use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::METRICS;

#[derive(Debug, Default)]
struct MailboxState {
    /// Armed slots not yet filled
    pending: usize,
    /// Some armed source was invalidated
    failed: bool,
}

/// Mailbox state shared with the subscriptions armed against it
#[derive(Debug, Default)]
pub(crate) struct MailboxShared {
    state: Mutex<MailboxState>,
    arrival: Condvar,
}

impl MailboxShared {
    /// Count one more armed slot
    pub(crate) fn expect(&self) {
        self.state.lock().pending += 1;
    }

    /// An armed slot was filled
    pub(crate) fn arrived(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        drop(state);
        self.arrival.notify_all();
    }

    /// An armed slot was cancelled before delivery
    pub(crate) fn withdraw(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    /// A source is gone. `armed` is true when the source had a slot counted.
    pub(crate) fn fail(&self, armed: bool) {
        let mut state = self.state.lock();
        if armed {
            state.pending = state.pending.saturating_sub(1);
        }
        state.failed = true;
        drop(state);
        self.arrival.notify_all();
    }
}

/// Waits for the next delivery on several subscriptions as one unit
///
/// Reusable after a successful [`Mailbox::wait`]. A failed mailbox stays
/// failed.
#[derive(Debug, Default)]
pub struct Mailbox {
    shared: Arc<MailboxShared>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every armed slot is filled (`true`) or any armed source
    /// has gone away (`false`)
    ///
    /// Slots filled before a failure keep their buffers; the caller must
    /// cancel its subscriptions and drop or drain the slots.
    pub fn wait(&self) -> bool {
        let mut state = self.shared.state.lock();
        loop {
            if state.failed {
                METRICS.join_failed();
                return false;
            }
            if state.pending == 0 {
                METRICS.join_completed();
                return true;
            }
            self.shared.arrival.wait(&mut state);
        }
    }

    /// Like [`Mailbox::wait`], giving up after `timeout` with `None`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.failed {
                METRICS.join_failed();
                return Some(false);
            }
            if state.pending == 0 {
                METRICS.join_completed();
                return Some(true);
            }
            if self
                .shared
                .arrival
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return None;
            }
        }
    }

    /// Armed slots still waiting for a delivery
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending
    }

    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().failed
    }

    pub(crate) fn shared(&self) -> &Arc<MailboxShared> {
        &self.shared
    }
}

/// Destination of one armed pull
///
/// Dropping a slot releases any buffer still inside it.
#[derive(Debug)]
pub struct Slot<D> {
    rx: Receiver<D>,
}

impl<D> Slot<D> {
    pub(crate) fn new(rx: Receiver<D>) -> Self {
        Self { rx }
    }

    /// Take the delivered buffer, if it arrived
    pub fn take(&self) -> Option<D> {
        self.rx.try_recv().ok()
    }

    pub fn is_filled(&self) -> bool {
        !self.rx.is_empty()
    }
}

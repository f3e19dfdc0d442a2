//! Pipeline stage drivers
//!
//! Each stage runs its loop on a dedicated thread and stops only by itself:
//! when a publish reaches nobody, when an upstream source disappears, or when
//! a gating signal closes.

mod aggregator;
mod relay;
mod sink;

pub use aggregator::{Aggregator, Transform};
pub use relay::{Filler, Relay};
pub use sink::Sink;

use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::payload::Payload;
use crate::pool::{Delivery, PoolStats};
use crate::pubsub::{Observer, Publisher, Subscription};

/// Why a stage stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A publish found no subscribers
    NoListeners,
    /// An upstream publisher went away
    SourceGone,
    /// A gating signal was false
    GateClosed,
}

/// Stage lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Running,
    Terminated(Termination),
}

impl StageState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, StageState::Terminated(_))
    }
}

/// One iteration of a stage's loop
pub(crate) trait StageLoop: Send + 'static {
    fn step(&mut self) -> ControlFlow<Termination>;
}

/// Owns a stage's thread and tracks its state
pub(crate) struct Driver {
    name: String,
    state: Arc<Mutex<StageState>>,
    thread: Option<JoinHandle<Termination>>,
}

impl Driver {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(StageState::Idle)),
            thread: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Refuse a second start
    pub(crate) fn ensure_idle(&self) -> Result<()> {
        if *self.state.lock() != StageState::Idle {
            warn!(stage = %self.name, "Stage already started");
            return Err(Error::AlreadyStarted {
                stage: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Run `stage` on a new thread until it terminates
    pub(crate) fn spawn<L: StageLoop>(&mut self, mut stage: L) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != StageState::Idle {
                warn!(stage = %self.name, "Stage already started");
                return Err(Error::AlreadyStarted {
                    stage: self.name.clone(),
                });
            }
            *state = StageState::Running;
        }
        METRICS.stage_started();

        let state = self.state.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let termination = loop {
                    if let ControlFlow::Break(termination) = stage.step() {
                        break termination;
                    }
                };
                // Release subscriptions and the publisher before reporting
                drop(stage);
                *state.lock() = StageState::Terminated(termination);
                METRICS.stage_terminated();
                info!(stage = %name, ?termination, "Stage terminated");
                termination
            });

        match spawned {
            Ok(handle) => {
                info!(stage = %self.name, "Stage started");
                self.thread = Some(handle);
                Ok(())
            }
            Err(source) => {
                *self.state.lock() = StageState::Idle;
                METRICS.stage_spawn_failed();
                Err(Error::Spawn {
                    stage: self.name.clone(),
                    source,
                })
            }
        }
    }

    pub(crate) fn state(&self) -> StageState {
        *self.state.lock()
    }

    /// Wait for the thread; `None` if it was never started or already joined
    pub(crate) fn join(&mut self) -> Option<Termination> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(termination) => Some(termination),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!(stage = %self.name, "Stage thread panicked");
            }
        }
    }
}

/// A stage's publisher, owned by the stage until its thread takes it
///
/// Once the thread ends the publisher is torn down, so late subscribers get
/// an already-ended subscription.
pub(crate) struct Outlet<T: Payload> {
    publisher: Option<Arc<Publisher<T>>>,
    weak: Weak<Publisher<T>>,
}

impl<T: Payload> Outlet<T> {
    pub(crate) fn new(publisher: Publisher<T>) -> Self {
        let publisher = Arc::new(publisher);
        Self {
            weak: Arc::downgrade(&publisher),
            publisher: Some(publisher),
        }
    }

    /// Hand the publisher to the driver thread
    pub(crate) fn take(&mut self) -> Option<Arc<Publisher<T>>> {
        self.publisher.take()
    }

    pub(crate) fn subscribe(&self) -> Subscription<Delivery<T>> {
        match self.weak.upgrade() {
            Some(publisher) => publisher.subscribe(),
            None => Subscription::detached(),
        }
    }

    pub(crate) fn observe(&self) -> Observer {
        match self.weak.upgrade() {
            Some(publisher) => publisher.observe(),
            None => Subscription::detached(),
        }
    }

    pub(crate) fn pool_stats(&self) -> Option<PoolStats> {
        self.weak.upgrade().map(|publisher| publisher.pool_stats())
    }
}

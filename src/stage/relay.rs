//! Relay stage
//!
//! Acquires a blank from its own pool, fills it, publishes it. Stops the
//! first time a publish reaches nobody, so subscribe before starting.

use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::trace;

use super::{Driver, Outlet, StageLoop, StageState, Termination};
use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::pool::{Delivery, PoolStats};
use crate::pubsub::{Observer, Publisher, Subscription};

/// Fills a blank for the given step
pub type Filler<T> = Box<dyn FnMut(u64, &mut T) + Send>;

struct RelayLoop<T: Payload> {
    publisher: Arc<Publisher<T>>,
    filler: Filler<T>,
    step: u64,
}

impl<T: Payload> StageLoop for RelayLoop<T> {
    fn step(&mut self) -> ControlFlow<Termination> {
        let mut blank = self.publisher.acquire();
        (self.filler)(self.step, &mut *blank.write());

        let fan_out = self.publisher.publish(blank);
        trace!(stage = %self.publisher.name(), step = self.step, fan_out, "Published");
        self.step += 1;

        if fan_out == 0 {
            return ControlFlow::Break(Termination::NoListeners);
        }
        ControlFlow::Continue(())
    }
}

/// Single-output producer stage
pub struct Relay<T: Payload> {
    outlet: Outlet<T>,
    filler: Option<Filler<T>>,
    driver: Driver,
}

impl<T: Payload> Relay<T> {
    /// Create a relay with `capacity` buffers built by `factory`
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        factory: impl FnMut() -> T,
        filler: impl FnMut(u64, &mut T) + Send + 'static,
    ) -> Result<Self> {
        let name = name.into();
        let publisher = Publisher::new(name.clone(), capacity, factory)?;
        Ok(Self {
            outlet: Outlet::new(publisher),
            filler: Some(Box::new(filler)),
            driver: Driver::new(name),
        })
    }

    pub fn subscribe(&self) -> Subscription<Delivery<T>> {
        self.outlet.subscribe()
    }

    pub fn observe(&self) -> Observer {
        self.outlet.observe()
    }

    /// Start the driver thread
    pub fn start(&mut self) -> Result<()> {
        self.driver.ensure_idle()?;
        let (Some(publisher), Some(filler)) = (self.outlet.take(), self.filler.take()) else {
            return Err(Error::AlreadyStarted {
                stage: self.driver.name().to_string(),
            });
        };
        self.driver.spawn(RelayLoop {
            publisher,
            filler,
            step: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    pub fn state(&self) -> StageState {
        self.driver.state()
    }

    /// Wait for the stage to terminate
    pub fn join(&mut self) -> Option<Termination> {
        self.driver.join()
    }

    /// Pool statistics while the publisher is alive
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.outlet.pool_stats()
    }
}

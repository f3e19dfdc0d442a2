//! Gated aggregator stage
//!
//! Joins one primary subscription with a set of gating signal subscriptions.
//! Each round waits for every source to deliver, then publishes a derived
//! buffer only if all gates are open. The derived buffer holds the primary
//! buffer until it is recycled itself.

use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{Driver, Outlet, StageLoop, StageState, Termination};
use crate::error::{Error, Result};
use crate::payload::{Payload, Signal};
use crate::pool::{Delivery, PoolStats};
use crate::pubsub::{Mailbox, Observer, Publisher, Slot, Subscription};

/// Derives an output payload from a primary payload
pub type Transform<S, O> = Box<dyn FnMut(&S, &mut O) + Send>;

struct Inputs<S: Payload, O: Payload> {
    primary: Subscription<Delivery<S>>,
    gates: Vec<Subscription<Delivery<Signal>>>,
    transform: Transform<S, O>,
}

struct AggregatorLoop<S: Payload, O: Payload> {
    publisher: Arc<Publisher<O>>,
    inputs: Inputs<S, O>,
    mailbox: Mailbox,
}

impl<S: Payload, O: Payload> AggregatorLoop<S, O> {
    fn cancel_all(&self) {
        self.inputs.primary.cancel();
        for gate in &self.inputs.gates {
            gate.cancel();
        }
    }
}

impl<S: Payload, O: Payload> StageLoop for AggregatorLoop<S, O> {
    fn step(&mut self) -> ControlFlow<Termination> {
        let primary = self.inputs.primary.arm(&self.mailbox);
        let gates: Vec<Slot<Delivery<Signal>>> = self
            .inputs
            .gates
            .iter()
            .map(|gate| gate.arm(&self.mailbox))
            .collect();

        if !self.mailbox.wait() {
            self.cancel_all();
            // Partial deliveries are released with their slots
            drop(primary);
            drop(gates);
            debug!(stage = %self.publisher.name(), "Upstream gone");
            return ControlFlow::Break(Termination::SourceGone);
        }

        // Every slot is filled once the join completes
        let mut open = true;
        for slot in gates {
            match slot.take() {
                Some(signal) => open &= signal.read().status,
                None => open = false,
            }
        }
        let Some(source) = primary.take() else {
            return ControlFlow::Break(Termination::SourceGone);
        };
        if !open {
            drop(source);
            debug!(stage = %self.publisher.name(), "Gate closed");
            return ControlFlow::Break(Termination::GateClosed);
        }

        let mut blank = self.publisher.acquire();
        (self.inputs.transform)(&*source.read(), &mut *blank.write());
        blank.chain(source);

        let fan_out = self.publisher.publish(blank);
        trace!(stage = %self.publisher.name(), fan_out, "Published");
        if fan_out == 0 {
            return ControlFlow::Break(Termination::NoListeners);
        }
        ControlFlow::Continue(())
    }
}

/// Multi-source stage gated on boolean signals
pub struct Aggregator<S: Payload, O: Payload> {
    outlet: Outlet<O>,
    inputs: Option<Inputs<S, O>>,
    driver: Driver,
}

impl<S: Payload, O: Payload> Aggregator<S, O> {
    /// Create an aggregator publishing from a pool of `capacity` buffers
    ///
    /// `primary` supplies the data to transform; every subscription in
    /// `gates` must deliver an open signal for a round to be published.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        factory: impl FnMut() -> O,
        primary: Subscription<Delivery<S>>,
        gates: Vec<Subscription<Delivery<Signal>>>,
        transform: impl FnMut(&S, &mut O) + Send + 'static,
    ) -> Result<Self> {
        let name = name.into();
        let publisher = Publisher::new(name.clone(), capacity, factory)?;
        debug!(stage = %name, gates = gates.len(), "Aggregator created");
        Ok(Self {
            outlet: Outlet::new(publisher),
            inputs: Some(Inputs {
                primary,
                gates,
                transform: Box::new(transform),
            }),
            driver: Driver::new(name),
        })
    }

    pub fn subscribe(&self) -> Subscription<Delivery<O>> {
        self.outlet.subscribe()
    }

    pub fn observe(&self) -> Observer {
        self.outlet.observe()
    }

    /// Start the driver thread
    pub fn start(&mut self) -> Result<()> {
        self.driver.ensure_idle()?;
        let (Some(publisher), Some(inputs)) = (self.outlet.take(), self.inputs.take()) else {
            return Err(Error::AlreadyStarted {
                stage: self.driver.name().to_string(),
            });
        };
        self.driver.spawn(AggregatorLoop {
            publisher,
            inputs,
            mailbox: Mailbox::new(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ExchangeVector, FireVector};

    fn copy_bits(source: &ExchangeVector, out: &mut FireVector) {
        out.set_fire_bits(source.words());
    }

    fn signal(publisher: &Publisher<Signal>, status: bool) -> usize {
        let mut blank = publisher.acquire();
        blank.write().status = status;
        publisher.publish(blank)
    }

    #[test]
    fn test_open_gates_publish_derived_buffer() {
        let source = Publisher::new("exchange", 2, || ExchangeVector::new(64)).unwrap();
        let gate = Publisher::new("gate", 2, Signal::default).unwrap();

        let mut aggregator = Aggregator::new(
            "fire",
            2,
            || FireVector::new(64),
            source.subscribe(),
            vec![gate.subscribe()],
            copy_bits,
        )
        .unwrap();
        let out = aggregator.subscribe();
        aggregator.start().unwrap();

        let mut blank = source.acquire();
        blank.write().set(3);
        source.publish(blank);
        signal(&gate, true);

        let fire = out.pull().unwrap();
        assert_eq!(fire.read().words()[0], 1 << 3);
        // The source buffer is chained to the derived one
        assert_eq!(source.pool_stats().in_flight, 1);
        drop(fire);
        assert_eq!(source.pool_stats().in_flight, 0);

        drop(source);
        assert_eq!(aggregator.join(), Some(Termination::SourceGone));
        assert!(out.pull().is_none());
    }

    #[test]
    fn test_closed_gate_terminates_without_publishing() {
        let source = Publisher::new("exchange", 1, || ExchangeVector::new(64)).unwrap();
        let gates: Vec<Publisher<Signal>> = (0..2)
            .map(|i| Publisher::new(format!("gate-{i}"), 1, Signal::default).unwrap())
            .collect();

        let mut aggregator = Aggregator::new(
            "fire",
            1,
            || FireVector::new(64),
            source.subscribe(),
            gates.iter().map(|g| g.subscribe()).collect(),
            copy_bits,
        )
        .unwrap();
        let out = aggregator.subscribe();
        aggregator.start().unwrap();

        source.publish(source.acquire());
        signal(&gates[0], true);
        signal(&gates[1], false);

        assert_eq!(aggregator.join(), Some(Termination::GateClosed));
        assert!(out.pull().is_none());
        // Primary and every gate buffer went back to their pools
        assert_eq!(source.pool_stats().available, 1);
        assert!(gates.iter().all(|g| g.pool_stats().available == 1));
    }

    #[test]
    fn test_gone_gate_releases_partial_deliveries() {
        let source = Publisher::new("exchange", 1, || ExchangeVector::new(64)).unwrap();
        let gate = Publisher::new("gate", 1, Signal::default).unwrap();

        let mut aggregator = Aggregator::new(
            "fire",
            1,
            || FireVector::new(64),
            source.subscribe(),
            vec![gate.subscribe()],
            copy_bits,
        )
        .unwrap();
        let _out = aggregator.subscribe();
        aggregator.start().unwrap();

        source.publish(source.acquire());
        drop(gate);

        assert_eq!(aggregator.join(), Some(Termination::SourceGone));
        assert_eq!(source.pool_stats().available, 1);
        assert_eq!(source.subscriber_count(), 0);
    }
}

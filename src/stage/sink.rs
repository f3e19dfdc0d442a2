//! Data sink stage
//!
//! Collects each buffer from one source into a buffer shaped by a
//! `DataDescription`, for as long as its dependent signals stay open.
//! Readers subscribe to the sink to receive the collected data.

use tracing::{debug, warn};

use super::{Aggregator, StageState, Termination};
use crate::error::{Error, Result};
use crate::metadata::DataDescription;
use crate::payload::{Payload, Signal, SinkBuffer};
use crate::pool::{Delivery, PoolStats};
use crate::pubsub::{Observer, Subscription};

/// Terminal collection stage
pub struct Sink<S: Payload> {
    description: DataDescription,
    stage: Aggregator<S, SinkBuffer>,
}

impl<S: Payload> Sink<S> {
    /// Create a sink with `buffers` collection buffers of shape `description`
    ///
    /// Fails when the description holds no data or `buffers` is zero. Every
    /// subscription in `dependents` must deliver an open signal for a step to
    /// be collected.
    pub fn new(
        name: impl Into<String>,
        description: DataDescription,
        buffers: usize,
        source: Subscription<Delivery<S>>,
        dependents: Vec<Subscription<Delivery<Signal>>>,
        collect: impl FnMut(&S, &mut SinkBuffer) + Send + 'static,
    ) -> Result<Self> {
        let name = name.into();
        if description.byte_size() == 0 {
            warn!(stage = %name, "No data is actually collected in this sink");
            return Err(Error::EmptyPayload { pool: name });
        }
        if buffers == 0 {
            warn!(stage = %name, "Sink needs at least one buffer");
            return Err(Error::InvalidCapacity { capacity: buffers });
        }

        let shape = description.clone();
        let stage = Aggregator::new(
            name,
            buffers,
            move || SinkBuffer::new(shape.clone()),
            source,
            dependents,
            collect,
        )?;
        debug!(
            stage = %stage.name(),
            real = description.real_elements,
            padding = description.padding_elements,
            "Sink created"
        );
        Ok(Self { description, stage })
    }

    pub fn description(&self) -> &DataDescription {
        &self.description
    }

    pub fn total_elements(&self) -> usize {
        self.description.total_elements()
    }

    pub fn real_elements(&self) -> usize {
        self.description.real_elements
    }

    pub fn padding_elements(&self) -> usize {
        self.description.padding_elements
    }

    pub fn subscribe(&self) -> Subscription<Delivery<SinkBuffer>> {
        self.stage.subscribe()
    }

    pub fn observe(&self) -> Observer {
        self.stage.observe()
    }

    /// Start the driver thread
    pub fn start(&mut self) -> Result<()> {
        self.stage.start()
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }

    pub fn state(&self) -> StageState {
        self.stage.state()
    }

    /// Wait for the stage to terminate
    pub fn join(&mut self) -> Option<Termination> {
        self.stage.join()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.stage.pool_stats()
    }
}

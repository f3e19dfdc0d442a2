//! relaypool - pooled publish/subscribe buffers for pipeline stages
//!
//! Producers take buffers from a fixed-size pool, fill them and publish them
//! to every current subscriber. A buffer goes back to its pool once the last
//! subscriber releases it. Stage drivers chain publishers into pipelines that
//! shut down on their own when their consumers or sources go away.

pub mod config;
pub mod error;
pub mod generator;
pub mod metadata;
pub mod metrics;
pub mod payload;
pub mod pool;
pub mod pubsub;
pub mod registry;
pub mod stage;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};
pub use payload::{ExchangeVector, FireVector, Payload, Signal, SinkBuffer};
pub use pool::{Blank, Delivery, Handle, Pool, PoolStats};
pub use pubsub::{Mailbox, Observer, Publisher, Pulled, Slot, Subscription};
pub use stage::{Aggregator, Relay, Sink, StageState, Termination};

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

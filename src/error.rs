//! Error types
//!
//! Configuration errors surface here. A vanished upstream is never an error:
//! it shows up as `None` from a pull or a failed mailbox join.

use crate::registry::DeviceType;

/// Result alias for fallible construction paths
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported while building or starting pipeline components
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A pool was asked for zero buffers
    #[error("invalid pool capacity {capacity}: must be greater than 0")]
    InvalidCapacity { capacity: usize },

    /// A pool payload would carry no data
    #[error("payload for pool '{pool}' has a byte size of zero")]
    EmptyPayload { pool: String },

    /// A producer for this (type, device) pair already exists
    #[error("a {device} {product} producer for type '{type_name}' has already been registered")]
    DuplicateProducer {
        product: String,
        type_name: String,
        device: DeviceType,
    },

    /// No producer registered for this (type, device) pair
    #[error("no {device} {product} producer registered for type '{type_name}'")]
    MissingProducer {
        product: String,
        type_name: String,
        device: DeviceType,
    },

    /// An instantiator for this type already exists
    #[error("{product} instantiator for type '{type_name}' has already been registered")]
    DuplicateInstantiator { product: String, type_name: String },

    /// A stage driver was started twice
    #[error("stage '{stage}' already started")]
    AlreadyStarted { stage: String },

    /// The driver thread could not be spawned
    #[error("failed to spawn stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is out of range
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

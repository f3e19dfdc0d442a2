//! Producer registry
//!
//! Maps a type name to a producer function for each device type, and to an
//! instantiator that builds an instance from model parameters. Duplicate
//! registrations are refused and missing entries are reported.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::generator::ModelParameters;

/// Execution target a producer is specialised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Cuda,
    Cl,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Cuda => "CUDA",
            DeviceType::Cl => "CL",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds one product
pub type Producer<P> = Arc<dyn Fn() -> P + Send + Sync>;

/// An instance built from model parameters; dropping it destroys it
pub type Instance = Box<dyn Any + Send>;

/// Builds an instance of one type from its parameters
pub type Instantiator = Arc<dyn Fn(&ModelParameters) -> Instance + Send + Sync>;

/// Producers of one product kind, keyed by (type name, device), plus one
/// instantiator per type name
pub struct FactoryMap<P> {
    product_type: String,
    producers: DashMap<(String, DeviceType), Producer<P>>,
    instantiators: DashMap<String, Instantiator>,
}

impl<P> FactoryMap<P> {
    /// Create an empty map; `product_type` names the product in diagnostics
    pub fn new(product_type: impl Into<String>) -> Self {
        Self {
            product_type: product_type.into(),
            producers: DashMap::new(),
            instantiators: DashMap::new(),
        }
    }

    /// Register a producer for `type_name` on `device`
    pub fn register(
        &self,
        type_name: impl Into<String>,
        device: DeviceType,
        producer: impl Fn() -> P + Send + Sync + 'static,
    ) -> Result<()> {
        let type_name = type_name.into();
        match self.producers.entry((type_name.clone(), device)) {
            Entry::Occupied(_) => {
                warn!(
                    product = %self.product_type,
                    type_name = %type_name,
                    %device,
                    "Producer already registered"
                );
                Err(Error::DuplicateProducer {
                    product: self.product_type.clone(),
                    type_name,
                    device,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(producer));
                debug!(
                    product = %self.product_type,
                    type_name = %type_name,
                    %device,
                    "Producer registered"
                );
                Ok(())
            }
        }
    }

    /// Look up the producer for `type_name` on `device`
    pub fn producer(&self, type_name: &str, device: DeviceType) -> Option<Producer<P>> {
        let found = self
            .producers
            .get(&(type_name.to_string(), device))
            .map(|entry| entry.value().clone());
        if found.is_none() {
            warn!(
                product = %self.product_type,
                type_name,
                %device,
                "Producer was not registered"
            );
        }
        found
    }

    /// Look up a producer that must exist
    pub fn require(&self, type_name: &str, device: DeviceType) -> Result<Producer<P>> {
        self.producer(type_name, device)
            .ok_or_else(|| Error::MissingProducer {
                product: self.product_type.clone(),
                type_name: type_name.to_string(),
                device,
            })
    }

    /// Register the instantiator for `type_name`
    pub fn register_instantiator(
        &self,
        type_name: impl Into<String>,
        instantiator: impl Fn(&ModelParameters) -> Instance + Send + Sync + 'static,
    ) -> Result<()> {
        let type_name = type_name.into();
        match self.instantiators.entry(type_name.clone()) {
            Entry::Occupied(_) => {
                warn!(
                    product = %self.product_type,
                    type_name = %type_name,
                    "Instantiator already registered"
                );
                Err(Error::DuplicateInstantiator {
                    product: self.product_type.clone(),
                    type_name,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(instantiator));
                debug!(
                    product = %self.product_type,
                    type_name = %type_name,
                    "Instantiator registered"
                );
                Ok(())
            }
        }
    }

    /// Look up the instantiator for `type_name`
    pub fn instantiator(&self, type_name: &str) -> Option<Instantiator> {
        let found = self
            .instantiators
            .get(type_name)
            .map(|entry| entry.value().clone());
        if found.is_none() {
            warn!(product = %self.product_type, type_name, "Instantiator was not registered");
        }
        found
    }

    /// Registered type names for `device`, sorted
    pub fn types(&self, device: DeviceType) -> Vec<String> {
        let mut types: Vec<String> = self
            .producers
            .iter()
            .filter(|entry| entry.key().1 == device)
            .map(|entry| entry.key().0.clone())
            .collect();
        types.sort();
        types
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

//! Parameter generators
//!
//! Generators produce model parameter values. Asking a generator for a kind
//! of value it cannot produce is a programming error and aborts the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Log and abort on a capability a generator does not have
#[cold]
pub fn unsupported(generator: &str, capability: &str) -> ! {
    error!(generator, capability, "{generator} cannot generate {capability}");
    std::process::abort()
}

/// Source of parameter values
pub trait Generator: Send + Sync {
    fn name(&self) -> &str {
        "Unknown"
    }

    fn generate_string(&self) -> String {
        unsupported(self.name(), "strings")
    }

    fn generate_int(&self) -> i64 {
        unsupported(self.name(), "integers")
    }

    fn generate_double(&self) -> f64 {
        unsupported(self.name(), "doubles")
    }

    fn generate_parameters(&self) -> Arc<ModelParameters> {
        unsupported(self.name(), "parameters")
    }

    /// Expand into a list of generators; a plain generator is a list of one
    fn generate_list(&self) -> Vec<&dyn Generator>
    where
        Self: Sized,
    {
        vec![self]
    }
}

/// Always yields the same value
#[derive(Debug, Clone, PartialEq)]
pub enum Exact {
    Int(i64),
    Double(f64),
    String(String),
}

impl Generator for Exact {
    fn name(&self) -> &str {
        match self {
            Exact::Int(_) => "ExactInteger",
            Exact::Double(_) => "ExactDouble",
            Exact::String(_) => "ExactString",
        }
    }

    fn generate_string(&self) -> String {
        match self {
            Exact::String(value) => value.clone(),
            _ => unsupported(self.name(), "strings"),
        }
    }

    fn generate_int(&self) -> i64 {
        match self {
            Exact::Int(value) => *value,
            _ => unsupported(self.name(), "integers"),
        }
    }

    fn generate_double(&self) -> f64 {
        match self {
            Exact::Double(value) => *value,
            _ => unsupported(self.name(), "doubles"),
        }
    }
}

/// Parameter generators for one model type, by parameter name
#[derive(Default)]
pub struct ModelParameters {
    type_name: String,
    parameters: HashMap<String, Arc<dyn Generator>>,
}

impl ModelParameters {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            parameters: HashMap::new(),
        }
    }

    /// Add or replace the generator for `name`
    pub fn with(mut self, name: impl Into<String>, generator: impl Generator + 'static) -> Self {
        self.parameters.insert(name.into(), Arc::new(generator));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<&dyn Generator> {
        self.parameters.get(name).map(|g| g.as_ref())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl fmt::Debug for ModelParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.parameters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ModelParameters")
            .field("type_name", &self.type_name)
            .field("parameters", &names)
            .finish()
    }
}

/// Always yields the same parameter set
#[derive(Debug, Clone)]
pub struct ExactParameters(pub Arc<ModelParameters>);

impl Generator for ExactParameters {
    fn name(&self) -> &str {
        "ExactParameters"
    }

    fn generate_parameters(&self) -> Arc<ModelParameters> {
        self.0.clone()
    }
}

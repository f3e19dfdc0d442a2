//! Configuration management
//!
//! Handles loading and validating pipeline configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::Error;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline shape
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Buffers in each stage's pool
    #[serde(default = "default_buffers")]
    pub buffers: usize,
    /// Bits in the exchanged vector
    #[serde(default = "default_vector_size")]
    pub vector_size: usize,
    /// Number of gating signal relays
    #[serde(default = "default_gates")]
    pub gates: usize,
    /// Steps the gates stay open (0 = until interrupted)
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Every `firing_period`-th element fires on each step
    #[serde(default = "default_firing_period")]
    pub firing_period: usize,
}

impl PipelineConfig {
    /// Whether the gates are open for `step`
    pub fn gate_open(&self, step: u64) -> bool {
        self.steps == 0 || step < self.steps
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::Result<()> {
        if self.buffers == 0 {
            return Err(Error::invalid_config("pipeline.buffers must be > 0"));
        }
        if self.vector_size == 0 {
            return Err(Error::invalid_config("pipeline.vector_size must be > 0"));
        }
        if self.firing_period == 0 {
            return Err(Error::invalid_config("pipeline.firing_period must be > 0"));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffers: default_buffers(),
            vector_size: default_vector_size(),
            gates: default_gates(),
            steps: default_steps(),
            firing_period: default_firing_period(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoints
    #[serde(default)]
    pub enabled: bool,
    /// Prometheus scrape address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
    /// JSON stats address
    #[serde(default = "default_api_addr")]
    pub api_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
            api_addr: default_api_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_buffers() -> usize { 4 }
fn default_vector_size() -> usize { 1024 }
fn default_gates() -> usize { 1 }
fn default_steps() -> u64 { 1000 }
fn default_firing_period() -> usize { 7 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_api_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9091)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.metrics.enabled && self.metrics.bind_addr == self.metrics.api_addr {
            anyhow::bail!("metrics.bind_addr and metrics.api_addr must differ");
        }
        Ok(())
    }
}

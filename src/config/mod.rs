//! Configuration management for the jobgauge worker
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use jobgauge::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Consuming {}", config.subscription_id);
//! ```
//!
//! # Environment Variables
//!
//! Variables are read without a prefix, matching the deployment manifests:
//! - `PROJECT_ID` (required)
//! - `SUBSCRIPTION_ID` (required)
//! - `JOB_DURATION_SEC` (default 90)
//! - `METRIC_TIMEOUT_SEC` (default 120)
//! - `DECAY_INTERVAL_SEC`, `METRICS_ADDR`, `WORK_BURST_ITERATIONS`,
//!   `WORK_REST_MS`, `PULL_RETRY_MS`, `PUBSUB_EMULATOR_HOST`
//!
//! # Configuration File
//!
//! An optional TOML file is read from `config/jobgauge.toml`, or from the
//! path in `JOBGAUGE_CONFIG`.

mod models;
mod sources;
mod validation;

pub use models::Config;
pub use validation::ValidationError;

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a value cannot be parsed (e.g. `JOB_DURATION_SEC=ninety`)
    /// - `PROJECT_ID` or `SUBSCRIPTION_ID` is missing
    /// - a duration or interval is zero
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path and explicit environment
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from(
        path: std::path::PathBuf,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path, Some(env))?;
        validation::validate(&config)?;
        Ok(config)
    }
}

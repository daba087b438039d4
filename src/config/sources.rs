use super::models::Config;
use config::{ConfigError, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "JOBGAUGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/jobgauge.toml";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path, None)
}

/// Load configuration from a specific path and environment
///
/// `env_override` replaces the process environment, which keeps tests away
/// from `std::env::set_var`.
pub fn load_from_sources(
    config_path: PathBuf,
    env_override: Option<HashMap<String, String>>,
) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment",
            config_path.display()
        );
    }

    // Unprefixed: PROJECT_ID -> project_id, JOB_DURATION_SEC -> job_duration_sec
    builder = builder.add_source(
        Environment::default()
            .try_parsing(true)
            .source(env_override),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

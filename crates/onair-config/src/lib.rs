//! OnAir configuration system.
//!
//! TOML-based configuration for the live-room orchestrator. Every section
//! uses serde defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use onair_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("lease: {}s", config.presence.lease_secs);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{OnAirConfig, CONFIG_SCHEMA_VERSION};

use onair_common::ConfigError;

/// Load config from the platform default path, creating a default file if
/// none exists, and validate it strictly.
pub fn load_config() -> Result<OnAirConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &OnAirConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

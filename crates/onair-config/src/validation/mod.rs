//! Full configuration validation.
//!
//! Each section has its own validator; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod sections;


use crate::schema::OnAirConfig;
use onair_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &OnAirConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    sections::validate_rooms(&mut errors, config);
    sections::validate_chat(&mut errors, config);
    sections::validate_presence(&mut errors, config);
    sections::validate_negotiation(&mut errors, config);
    sections::validate_retry(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

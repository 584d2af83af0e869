//! System configuration types: store retries and logging.

use serde::{Deserialize, Serialize};

/// Backoff for idempotent store operations that hit a transient failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// `tracing-subscriber` filter directive for the workspace crates.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "onair=trace",
            LogLevel::Debug => "onair=debug",
            LogLevel::Info => "onair=info",
            LogLevel::Warning => "onair=warn",
            LogLevel::Error => "onair=error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

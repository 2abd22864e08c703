//! FWA Telemetry - logging setup for the firewall agent
//!
//! Installs a `tracing-subscriber` pipeline with an `EnvFilter` and either
//! JSON or human-readable output. Everything goes to stderr; stdout is kept
//! for command output.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use fwa_telemetry::{TelemetryConfig, init_telemetry};
//!
//! init_telemetry(&TelemetryConfig::new("fwa").with_json_logs(true))?;
//! tracing::info!(subject = 10_042, "Starting up");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod logging;

pub use logging::*;

use serde::Deserialize;

/// The `[telemetry]` section of the agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Attached to the startup event so logs from several agents can be told
    /// apart.
    pub service_name: String,

    /// Filter directive used when `RUST_LOG` is unset (e.g. "info",
    /// "`fwa_engine=debug`").
    pub log_level: String,

    /// Emit one JSON object per event instead of human-readable lines.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "fwa".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    #[must_use]
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }
}

/// Initialize logging.
///
/// Call once at startup. A second call returns
/// [`TelemetryError::LoggingInit`] because a global subscriber is already set.
///
/// # Errors
///
/// Returns an error if the log filter is invalid or a subscriber is already
/// installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    tracing::debug!(
        service = %config.service_name,
        json = config.json_logs,
        "Telemetry initialized"
    );
    Ok(())
}

/// Telemetry error type.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The configured filter directive does not parse.
    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },
}

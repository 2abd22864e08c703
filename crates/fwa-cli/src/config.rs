//! Agent configuration file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use fwa_backend::BackendConfig;
use fwa_engine::EngineConfig;
use fwa_telemetry::TelemetryConfig;
use serde::Deserialize;

/// Top-level TOML document. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub engine: EngineConfig,
    pub backend: BackendConfig,
    pub telemetry: TelemetryConfig,
}

impl AgentConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse TOML")
    }
}

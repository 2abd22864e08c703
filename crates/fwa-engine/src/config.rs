//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use fwa_core::{DEFAULT_MIN_MANAGED_ID, ProtectedRange};
use serde::{Deserialize, Serialize};

/// What to do when a run is requested while another one holds the lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAdmission {
    /// Wait for the running pass to finish.
    #[default]
    Queue,
    /// Fail immediately with `RunInProgress`.
    Reject,
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lowest manageable subject id.
    #[serde(default = "default_min_managed_id")]
    pub min_managed_id: u32,

    /// Engine state document (signatures, blocked list, known subjects).
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Per-subject policy repository.
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    #[serde(default)]
    pub admission: RunAdmission,

    #[serde(default = "default_orphan_sweep_interval_secs")]
    pub orphan_sweep_interval_secs: u64,

    /// Forward progress every N items.
    #[serde(default = "default_progress_step")]
    pub progress_step: usize,

    /// ...or when this much time passed since the last forwarded update.
    #[serde(default = "default_progress_min_interval_ms")]
    pub progress_min_interval_ms: u64,
}

const fn default_min_managed_id() -> u32 {
    DEFAULT_MIN_MANAGED_ID
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/data/local/tmp/firewall_agent/state/engine_state.json")
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("/data/local/tmp/firewall_agent/state/policies.json")
}

const fn default_orphan_sweep_interval_secs() -> u64 {
    60
}

const fn default_progress_step() -> usize {
    4
}

const fn default_progress_min_interval_ms() -> u64 {
    700
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_managed_id: default_min_managed_id(),
            state_path: default_state_path(),
            policy_path: default_policy_path(),
            admission: RunAdmission::default(),
            orphan_sweep_interval_secs: default_orphan_sweep_interval_secs(),
            progress_step: default_progress_step(),
            progress_min_interval_ms: default_progress_min_interval_ms(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn protected_range(&self) -> ProtectedRange {
        ProtectedRange::new(self.min_managed_id)
    }

    #[must_use]
    pub const fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_secs)
    }

    #[must_use]
    pub const fn progress_min_interval(&self) -> Duration {
        Duration::from_millis(self.progress_min_interval_ms)
    }

    #[must_use]
    pub fn with_admission(mut self, admission: RunAdmission) -> Self {
        self.admission = admission;
        self
    }
}

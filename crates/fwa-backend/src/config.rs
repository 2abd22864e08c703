//! Backend configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the iptables backend and its privileged channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Packet filter binary.
    #[serde(default = "default_iptables")]
    pub iptables: String,

    /// Privilege escalation binary, invoked as `su -c <script>`.
    #[serde(default = "default_su")]
    pub su: String,

    /// Shell used when `su` is not installed (already privileged).
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default)]
    pub chains: ChainNames,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_iptables() -> String {
    "iptables".to_string()
}

fn default_su() -> String {
    "su".to_string()
}

fn default_shell() -> String {
    "/system/bin/sh".to_string()
}

const fn default_command_timeout_ms() -> u64 {
    15_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            iptables: default_iptables(),
            su: default_su(),
            shell: default_shell(),
            command_timeout_ms: default_command_timeout_ms(),
            chains: ChainNames::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Names of the chains the agent owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNames {
    /// Container hooked into OUTPUT; dispatches to per-subject chains.
    #[serde(default = "default_output_container")]
    pub output_container: String,

    /// Container hooked into INPUT; rejects inbound on tagged connections.
    #[serde(default = "default_input_container")]
    pub input_container: String,

    /// Prefix of per-subject chains (`FAU_10042`).
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_output_container() -> String {
    "FA_APP".to_string()
}

fn default_input_container() -> String {
    "FA_APP_IN".to_string()
}

fn default_subject_prefix() -> String {
    "FAU_".to_string()
}

impl Default for ChainNames {
    fn default() -> Self {
        Self {
            output_container: default_output_container(),
            input_container: default_input_container(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Retry policy for transient channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based), doubling up to the cap.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let millis = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

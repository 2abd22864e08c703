//! Engine wiring for a single CLI invocation.

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use fwa_backend::{FilterBackend, IptablesBackend, MemoryBackend};
use fwa_engine::{
    CoalescingProgress, EngineConfig, FilePolicyRepository, FileStateStore, ProgressSink,
    ReconciliationEngine,
};
use tracing::info;

/// Which packet filter the engine drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// The device packet filter, through the privileged shell.
    #[default]
    Iptables,
    /// A filter that lives only for this invocation (state files still
    /// persist). Useful for rehearsing a run.
    Memory,
}

/// Build an engine over the configured state files.
pub fn open_engine(
    engine: &EngineConfig,
    backend: &fwa_backend::BackendConfig,
    kind: BackendKind,
) -> ReconciliationEngine {
    let filter: Arc<dyn FilterBackend> = match kind {
        BackendKind::Iptables => Arc::new(IptablesBackend::privileged(backend)),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    ReconciliationEngine::new(
        filter,
        Arc::new(FileStateStore::new(&engine.state_path)),
        Arc::new(FilePolicyRepository::new(&engine.policy_path)),
        engine.clone(),
    )
}

/// Progress sink that logs coalesced updates.
pub fn progress_logger(config: &EngineConfig) -> impl ProgressSink + 'static {
    CoalescingProgress::new(
        |processed: usize, total: usize| info!(processed, total, "Applying"),
        config.progress_step,
        config.progress_min_interval(),
    )
}

/// Sweep interval, never below one second.
pub fn sweep_interval(config: &EngineConfig) -> Duration {
    config.orphan_sweep_interval().max(Duration::from_secs(1))
}

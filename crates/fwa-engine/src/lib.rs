//! FWA Engine - reconciliation engine for the per-app network firewall agent
//!
//! Keeps the packet filter converged with declared per-subject policy:
//!
//! - [`LiveStateInspector`]: infallible reads of what is enforced now
//! - [`plan`]: minimal upsert/remove sets from desired vs. live state
//! - [`IncrementalExecutor`]: per-subject application with failure isolation
//! - [`OrphanReconciler`]: removes chains of subjects no longer installed
//! - [`SubjectLifecycleAdapter`]: default-deny on install, cleanup on removal
//! - [`ReconciliationEngine`]: owns all of the above behind one run lock
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use fwa_backend::{BackendConfig, IptablesBackend};
//! use fwa_engine::{
//!     EngineConfig, FilePolicyRepository, FileStateStore, NoProgress, PlanScope,
//!     ReconciliationEngine,
//! };
//!
//! let config = EngineConfig::default();
//! let engine = ReconciliationEngine::new(
//!     Arc::new(IptablesBackend::privileged(&BackendConfig::default())),
//!     Arc::new(FileStateStore::new(&config.state_path)),
//!     Arc::new(FilePolicyRepository::new(&config.policy_path)),
//!     config,
//! );
//! let outcome = engine
//!     .submit_desired_policies(policies, PlanScope::Full, NoProgress)
//!     .await?;
//! tracing::info!(failed = outcome.summary.failed_uids, "Applied");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod engine;
mod error;
mod executor;
mod inspector;
mod lifecycle;
mod orphans;
mod planner;
mod progress;
mod repository;
mod state;

pub use config::*;
pub use engine::{EngineStatus, ReconciliationEngine};
pub use error::*;
pub use executor::*;
pub use inspector::*;
pub use lifecycle::*;
pub use orphans::{
    InstalledInventory, OrphanPass, OrphanReconciler, SkipReason, StaticInventory, find_orphans,
};
pub use planner::*;
pub use progress::*;
pub use repository::*;
pub use state::{EngineState, FileStateStore, MemoryStateStore, StateStore};

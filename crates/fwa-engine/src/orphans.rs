//! Orphan reconciler.
//!
//! Subjects that are managed live but no longer installed keep their chain
//! until something removes it. This pass finds them (plus any managed
//! protected subject), removes their chains under the run lock, and scrubs
//! their shadow state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fwa_core::{ProtectedRange, Subject};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::EngineInner;
use crate::{
    ApplyOutcome, EngineError, IncrementalExecutor, LiveStateInspector, NoProgress,
    ReconciliationEngine, ReconciliationPlan,
};

/// Source of the currently installed subject set.
#[async_trait]
pub trait InstalledInventory: Send + Sync {
    /// Installed subjects. An empty set means the inventory is unavailable.
    async fn installed_subjects(&self) -> BTreeSet<Subject>;
}

/// Inventory with a fixed subject set.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    subjects: BTreeSet<Subject>,
}

impl StaticInventory {
    #[must_use]
    pub fn new(subjects: impl IntoIterator<Item = Subject>) -> Self {
        Self {
            subjects: subjects.into_iter().collect(),
        }
    }
}

#[async_trait]
impl InstalledInventory for StaticInventory {
    async fn installed_subjects(&self) -> BTreeSet<Subject> {
        self.subjects.clone()
    }
}

/// Why an orphan pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The inventory reported no installed subjects at all.
    EmptyInventory,
    NothingManaged,
    NoOrphans,
}

/// Result of one orphan pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrphanPass {
    Skipped {
        reason: SkipReason,
    },
    Ran {
        orphans: BTreeSet<Subject>,
        outcome: ApplyOutcome,
    },
}

/// `(managed - installed) + (managed & protected)`.
#[must_use]
pub fn find_orphans(
    managed: &BTreeSet<Subject>,
    installed: &BTreeSet<Subject>,
    range: ProtectedRange,
) -> BTreeSet<Subject> {
    managed
        .iter()
        .copied()
        .filter(|s| !installed.contains(s) || range.is_protected(*s))
        .collect()
}

/// Orphan pass body. Caller holds the run lock.
pub(crate) async fn reconcile_locked(
    inner: &EngineInner,
    installed: &BTreeSet<Subject>,
) -> Result<OrphanPass, EngineError> {
    if installed.is_empty() {
        warn!("Installed inventory is empty, skipping orphan pass");
        return Ok(OrphanPass::Skipped {
            reason: SkipReason::EmptyInventory,
        });
    }

    let managed = LiveStateInspector::new(inner.backend.as_ref())
        .list_managed_subjects()
        .await;
    if managed.is_empty() {
        return Ok(OrphanPass::Skipped {
            reason: SkipReason::NothingManaged,
        });
    }

    let orphans = find_orphans(&managed, installed, inner.range());
    if orphans.is_empty() {
        return Ok(OrphanPass::Skipped {
            reason: SkipReason::NoOrphans,
        });
    }
    info!(count = orphans.len(), "Removing orphaned chains");

    let plan = ReconciliationPlan::removal(orphans.iter().copied());
    let outcome = IncrementalExecutor::new(inner.backend.as_ref())
        .apply(&plan, &mut NoProgress)
        .await?;

    inner.update_state(|state| state.scrub(&orphans))?;

    Ok(OrphanPass::Ran { orphans, outcome })
}

/// Runs orphan passes against an inventory, once or periodically.
pub struct OrphanReconciler {
    engine: ReconciliationEngine,
    inventory: Arc<dyn InstalledInventory>,
}

impl OrphanReconciler {
    #[must_use]
    pub fn new(engine: ReconciliationEngine, inventory: Arc<dyn InstalledInventory>) -> Self {
        Self { engine, inventory }
    }

    /// One pass against the current inventory.
    ///
    /// # Errors
    ///
    /// See [`ReconciliationEngine::reconcile_orphans`].
    pub async fn run_once(&self) -> Result<OrphanPass, EngineError> {
        let installed = self.inventory.installed_subjects().await;
        self.engine.reconcile_orphans(installed).await
    }

    /// Run a pass every `interval` until the handle is aborted.
    #[must_use]
    pub fn spawn_sweeper(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(OrphanPass::Ran { orphans, outcome }) => info!(
                        removed = outcome.summary.applied_uids,
                        failed = outcome.summary.failed_uids,
                        orphans = orphans.len(),
                        "Orphan sweep finished"
                    ),
                    Ok(OrphanPass::Skipped { reason }) => debug!(?reason, "Orphan sweep skipped"),
                    Err(EngineError::RunInProgress) => {
                        debug!("Orphan sweep deferred, run in progress");
                    }
                    Err(EngineError::ShutDown) => {
                        debug!("Engine shut down, orphan sweeper exiting");
                        break;
                    }
                    Err(error) => warn!(%error, "Orphan sweep failed"),
                }
            }
        })
    }
}

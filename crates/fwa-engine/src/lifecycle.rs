//! Subject lifecycle adapter.
//!
//! Reacts to install and removal events so that a new subject is never
//! transiently unrestricted and a removed one does not leave a chain behind.

use std::collections::BTreeSet;

use fwa_core::{AppPolicy, Subject};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::EngineInner;
use crate::{ApplyOutcome, EngineError, IncrementalExecutor, ReconciliationEngine};

/// Whether the known-subject set has been established yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No known set persisted: the first sync records what is installed and
    /// denies nothing.
    Bootstrap,
    /// Subjects missing from the known set are new and get default-deny.
    Steady,
}

/// Result of handling an install event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallOutcome {
    /// Protected subject; nothing recorded.
    Ignored,
    /// Default-deny recorded; `applied` is set when enforcement was active.
    Denied { applied: Option<ApplyOutcome> },
}

/// Result of a full inventory sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub state: LifecycleState,
    pub newly_denied: BTreeSet<Subject>,
    pub known: usize,
    pub applied: Option<ApplyOutcome>,
}

/// Handles subject install/removal events and inventory syncs.
#[derive(Debug, Clone)]
pub struct SubjectLifecycleAdapter {
    engine: ReconciliationEngine,
}

impl SubjectLifecycleAdapter {
    #[must_use]
    pub const fn new(engine: ReconciliationEngine) -> Self {
        Self { engine }
    }

    /// Record a default-deny policy for a newly installed subject and, if
    /// enforcement is active, install its chain right away.
    ///
    /// The policy and the known set are written before the run lock is
    /// taken, so a refused or queued delta still leaves the subject denied
    /// by the next pass.
    ///
    /// # Errors
    ///
    /// Returns a state error if the policy or known set cannot be written,
    /// or any error of the immediate delta run (including
    /// [`EngineError::RunInProgress`] under reject admission).
    pub async fn on_installed(&self, subject: Subject) -> Result<InstallOutcome, EngineError> {
        let inner = self.engine.inner();
        if inner.range().is_protected(subject) {
            debug!(%subject, "Ignoring install of protected subject");
            return Ok(InstallOutcome::Ignored);
        }

        let policy = AppPolicy::deny_all(subject);
        inner.repository.put(policy.clone())?;
        inner.update_state(|state| {
            state
                .known_subjects
                .get_or_insert_with(BTreeSet::new)
                .insert(subject);
        })?;
        info!(%subject, "Default-deny recorded for installed subject");

        let applied = self
            .engine
            .exclusive(move |inner| async move {
                if !inner.enforcing().await {
                    return Ok(None);
                }
                inner.submit_delta_locked(&[policy]).await.map(Some)
            })
            .await?;
        Ok(InstallOutcome::Denied { applied })
    }

    /// Remove the chain of a removed subject and forget it.
    ///
    /// The removal is sent whether or not the subject shows up as managed:
    /// a failed listing must not leave its chain behind.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInProgress`] under reject admission, or a
    /// state error.
    pub async fn on_removed(&self, subject: Subject) -> Result<ApplyOutcome, EngineError> {
        self.engine
            .exclusive(move |inner| async move { removed_locked(&inner, subject).await })
            .await
    }

    /// Reconcile the known-subject set with the installed inventory.
    ///
    /// # Errors
    ///
    /// Returns a state error, or any error of the delta run for new subjects.
    pub async fn sync_installed(
        &self,
        installed: BTreeSet<Subject>,
    ) -> Result<SyncReport, EngineError> {
        self.engine
            .exclusive(move |inner| async move { sync_locked(&inner, installed).await })
            .await
    }
}

async fn removed_locked(
    inner: &EngineInner,
    subject: Subject,
) -> Result<ApplyOutcome, EngineError> {
    let outcome = IncrementalExecutor::new(inner.backend.as_ref())
        .remove_chains(&BTreeSet::from([subject]))
        .await;
    if !outcome.is_clean() {
        warn!(%subject, "Chain removal failed, the orphan sweep will retry");
    }

    inner.update_state(|state| {
        state.scrub([&subject]);
        if let Some(known) = state.known_subjects.as_mut() {
            known.remove(&subject);
        }
    })?;
    inner.repository.delete(subject)?;
    info!(%subject, "Removed subject forgotten");
    Ok(outcome)
}

async fn sync_locked(
    inner: &EngineInner,
    installed: BTreeSet<Subject>,
) -> Result<SyncReport, EngineError> {
    let range = inner.range();
    let installed: BTreeSet<Subject> = installed
        .into_iter()
        .filter(|s| range.is_manageable(*s))
        .collect();
    let Some(known) = inner.store.load()?.known_subjects else {
        info!(count = installed.len(), "Bootstrapping known subjects");
        let known = installed.len();
        inner.update_state(|state| state.known_subjects = Some(installed))?;
        return Ok(SyncReport {
            state: LifecycleState::Bootstrap,
            newly_denied: BTreeSet::new(),
            known,
            applied: None,
        });
    };

    let mut newly_denied = BTreeSet::new();
    let mut policies = Vec::new();
    for &subject in installed.difference(&known) {
        if inner.repository.get(subject)?.is_some() {
            continue;
        }
        let policy = AppPolicy::deny_all(subject);
        inner.repository.put(policy.clone())?;
        newly_denied.insert(subject);
        policies.push(policy);
    }

    let known = installed.len();
    inner.update_state(|state| state.known_subjects = Some(installed))?;
    if !newly_denied.is_empty() {
        info!(count = newly_denied.len(), "Default-deny recorded for new subjects");
    }

    let applied = if !policies.is_empty() && inner.enforcing().await {
        Some(inner.submit_delta_locked(&policies).await?)
    } else {
        None
    };
    Ok(SyncReport {
        state: LifecycleState::Steady,
        newly_denied,
        known,
        applied,
    })
}

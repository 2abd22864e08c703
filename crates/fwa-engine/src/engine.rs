//! The reconciliation engine handle.
//!
//! [`ReconciliationEngine`] owns the backend, the persisted state and the
//! policy repository, and serializes every mutating pass behind one run lock.
//! Passes execute on a spawned task that holds the lock permit, so a caller
//! dropping its future cannot cancel a pass half way through.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fwa_backend::FilterBackend;
use fwa_core::{AppPolicy, ProtectedRange, Subject};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{info, warn};

use crate::{
    ApplyOutcome, EngineConfig, EngineError, EngineState, IncrementalExecutor,
    InstalledInventory, LiveStateInspector, NoProgress, OrphanPass, OrphanReconciler, PlanScope,
    PlannedRun, PolicyRepository, ProgressSink, RunAdmission, StateError, StateStore,
    SubjectLifecycleAdapter, orphans, plan,
};

/// Snapshot of what the engine knows and enforces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Output container hooked.
    pub enforcing: bool,
    pub managed: BTreeSet<Subject>,
    pub snapshot_entries: usize,
    pub blocked: BTreeSet<Subject>,
    /// `None` while the lifecycle adapter is still bootstrapping.
    pub known_subjects: Option<usize>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub(crate) struct EngineInner {
    pub(crate) backend: Arc<dyn FilterBackend>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) repository: Arc<dyn PolicyRepository>,
    pub(crate) config: EngineConfig,
    run_lock: Arc<Semaphore>,
    // Serializes load-modify-save cycles on the state document. Lifecycle
    // events update it without holding the run lock.
    state_lock: Mutex<()>,
}

/// Cheaply clonable handle to one engine instance.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.inner.config)
            .field("running", &(self.inner.run_lock.available_permits() == 0))
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        backend: Arc<dyn FilterBackend>,
        store: Arc<dyn StateStore>,
        repository: Arc<dyn PolicyRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                store,
                repository,
                config,
                run_lock: Arc::new(Semaphore::new(1)),
                state_lock: Mutex::new(()),
            }),
        }
    }

    pub(crate) const fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn PolicyRepository> {
        &self.inner.repository
    }

    #[must_use]
    pub fn lifecycle(&self) -> SubjectLifecycleAdapter {
        SubjectLifecycleAdapter::new(self.clone())
    }

    #[must_use]
    pub fn orphan_reconciler(&self, inventory: Arc<dyn InstalledInventory>) -> OrphanReconciler {
        OrphanReconciler::new(self.clone(), inventory)
    }

    // ------------------------------------------------------------------------
    // Run lock
    // ------------------------------------------------------------------------

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        let lock = Arc::clone(&self.inner.run_lock);
        match self.inner.config.admission {
            RunAdmission::Queue => lock
                .acquire_owned()
                .await
                .map_err(|_| EngineError::ShutDown),
            RunAdmission::Reject => lock.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => EngineError::RunInProgress,
                TryAcquireError::Closed => EngineError::ShutDown,
            }),
        }
    }

    /// Run `op` on its own task while holding the run lock.
    pub(crate) async fn exclusive<T, F, Fut>(&self, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<EngineInner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire().await?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _permit = permit;
            op(inner).await
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?
    }

    /// Wait for the running pass to finish, then refuse every later run
    /// with [`EngineError::ShutDown`].
    ///
    /// Passes run on their own tasks, so a process that exits while one is
    /// in flight would drop it mid-script. Await this before returning from
    /// `main`.
    pub async fn shutdown(&self) {
        let lock = &self.inner.run_lock;
        // Always waits, whatever the admission mode.
        let drained = lock.acquire().await;
        lock.close();
        drop(drained);
        info!("Engine shut down");
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Plan and apply `policies`, committing the snapshot on a clean run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SetupFailure`] if enforcement cannot be set up,
    /// [`EngineError::RunInProgress`] under reject admission, or a state error
    /// if the snapshot cannot be loaded.
    pub async fn submit_desired_policies(
        &self,
        policies: Vec<AppPolicy>,
        scope: PlanScope,
        progress: impl ProgressSink + 'static,
    ) -> Result<ApplyOutcome, EngineError> {
        let mut progress: Box<dyn ProgressSink> = Box::new(progress);
        self.exclusive(move |inner| async move {
            inner.submit_locked(&policies, scope, progress.as_mut()).await
        })
        .await
    }

    /// Full submission of every policy in the repository.
    ///
    /// # Errors
    ///
    /// Same as [`Self::submit_desired_policies`], plus repository read errors.
    pub async fn apply_repository(
        &self,
        progress: impl ProgressSink + 'static,
    ) -> Result<ApplyOutcome, EngineError> {
        let policies = self.inner.repository.load_all()?;
        self.submit_desired_policies(policies, PlanScope::Full, progress)
            .await
    }

    /// Compute the plan for `policies` without applying anything.
    ///
    /// # Errors
    ///
    /// Returns a state error if the snapshot cannot be loaded.
    pub async fn plan(
        &self,
        policies: &[AppPolicy],
        scope: PlanScope,
    ) -> Result<PlannedRun, EngineError> {
        let state = self.inner.store.load()?;
        let live = LiveStateInspector::new(self.inner.backend.as_ref());
        Ok(plan(
            policies,
            &state.signatures,
            &live,
            self.inner.range(),
            scope,
        )
        .await)
    }

    /// Remove chains of subjects that are managed but no longer installed,
    /// plus any managed protected subject.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SetupFailure`], [`EngineError::RunInProgress`]
    /// or a state error.
    pub async fn reconcile_orphans(
        &self,
        installed: BTreeSet<Subject>,
    ) -> Result<OrphanPass, EngineError> {
        self.exclusive(move |inner| async move {
            orphans::reconcile_locked(&inner, &installed).await
        })
        .await
    }

    /// See [`SubjectLifecycleAdapter::on_installed`].
    ///
    /// # Errors
    ///
    /// Propagates lifecycle adapter errors.
    pub async fn on_subject_installed(
        &self,
        subject: Subject,
    ) -> Result<crate::InstallOutcome, EngineError> {
        self.lifecycle().on_installed(subject).await
    }

    /// See [`SubjectLifecycleAdapter::on_removed`].
    ///
    /// # Errors
    ///
    /// Propagates lifecycle adapter errors.
    pub async fn on_subject_removed(
        &self,
        subject: Subject,
    ) -> Result<ApplyOutcome, EngineError> {
        self.lifecycle().on_removed(subject).await
    }

    /// Current enforcement status.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the enforcement probe fails, or a state
    /// error if the state cannot be loaded.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let state = self.inner.store.load()?;
        let enforcing = self.inner.backend.is_enforcing().await?;
        let managed = LiveStateInspector::new(self.inner.backend.as_ref())
            .list_managed_subjects()
            .await;
        Ok(EngineStatus {
            enforcing,
            managed,
            snapshot_entries: state.signatures.len(),
            blocked: state.blocked,
            known_subjects: state.known_subjects.as_ref().map(BTreeSet::len),
            updated_at: state.updated_at,
        })
    }

    /// Stop enforcing: delete every chain and forget the snapshot.
    ///
    /// # Errors
    ///
    /// Returns a backend error if teardown fails (the snapshot is then kept).
    pub async fn disable(&self) -> Result<(), EngineError> {
        self.exclusive(|inner| async move {
            inner.backend.clear_all().await?;
            inner.update_state(EngineState::clear_snapshot)?;
            info!("Enforcement disabled");
            Ok::<(), EngineError>(())
        })
        .await
    }
}

impl EngineInner {
    pub(crate) const fn range(&self) -> ProtectedRange {
        self.config.protected_range()
    }

    /// Load, modify and save the state document as one step.
    pub(crate) fn update_state<R>(
        &self,
        update: impl FnOnce(&mut EngineState) -> R,
    ) -> Result<R, StateError> {
        let _guard = self.state_lock.lock();
        let mut state = self.store.load()?;
        let out = update(&mut state);
        self.store.save(&state)?;
        Ok(out)
    }

    /// Plan, apply and commit. Caller holds the run lock.
    pub(crate) async fn submit_locked(
        &self,
        policies: &[AppPolicy],
        scope: PlanScope,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyOutcome, EngineError> {
        let signatures = self.store.load()?.signatures;
        let live = LiveStateInspector::new(self.backend.as_ref());
        let run = plan(policies, &signatures, &live, self.range(), scope).await;
        info!(
            ?scope,
            submitted = policies.len(),
            upsert = run.plan.upsert.len(),
            remove = run.plan.remove.len(),
            "Reconciliation plan computed"
        );

        let outcome = IncrementalExecutor::new(self.backend.as_ref())
            .apply(&run.plan, progress)
            .await?;

        if outcome.is_clean() {
            if let Err(error) = self.update_state(|state| state.commit(scope, &run)) {
                warn!(%error, "Failed to persist signature snapshot");
            }
        } else {
            warn!(
                failed = outcome.summary.failed_uids,
                "Run had failures, signature snapshot left unchanged"
            );
        }
        Ok(outcome)
    }

    /// Single-subject delta without progress reporting.
    pub(crate) async fn submit_delta_locked(
        &self,
        policies: &[AppPolicy],
    ) -> Result<ApplyOutcome, EngineError> {
        self.submit_locked(policies, PlanScope::Delta, &mut NoProgress)
            .await
    }

    /// Enforcement probe that treats failures as "not enforcing".
    pub(crate) async fn enforcing(&self) -> bool {
        match self.backend.is_enforcing().await {
            Ok(enforcing) => enforcing,
            Err(error) => {
                warn!(%error, "Enforcement probe failed");
                false
            }
        }
    }
}

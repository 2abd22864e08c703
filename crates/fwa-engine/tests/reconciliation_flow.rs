//! End-to-end reconciliation tests over the in-memory backend.
//!
//! Covers convergence, partial failure, orphan cleanup, the lifecycle
//! adapter, run admission, and persistence across engine instances.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fwa_backend::{BackendOp, BackendResult, FilterBackend, MemoryBackend};
use fwa_core::{AppPolicy, ChainSpec, Directive, Subject, compile_spec};
use fwa_engine::{
    EngineConfig, EngineError, FileStateStore, InstallOutcome, LifecycleState,
    MemoryPolicyRepository, MemoryStateStore, NoProgress, OrphanPass, PlanScope, PolicyRepository,
    ReconciliationEngine, RunAdmission, SkipReason, StateStore, StaticInventory,
};
use fwa_testkit::{RecordingProgress, fixtures, init_test_tracing};
use tokio::sync::{Notify, Semaphore};

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    engine: ReconciliationEngine,
    backend: Arc<MemoryBackend>,
    store: Arc<MemoryStateStore>,
    repo: Arc<MemoryPolicyRepository>,
}

fn harness_with(backend: MemoryBackend, config: EngineConfig) -> Harness {
    init_test_tracing();
    let backend = Arc::new(backend);
    let store = Arc::new(MemoryStateStore::new());
    let repo = Arc::new(MemoryPolicyRepository::new());
    let engine = ReconciliationEngine::new(backend.clone(), store.clone(), repo.clone(), config);
    Harness {
        engine,
        backend,
        store,
        repo,
    }
}

fn harness() -> Harness {
    harness_with(MemoryBackend::new(), EngineConfig::default())
}

/// Harness whose backend already enforces (containers hooked).
fn enforcing_harness() -> Harness {
    harness_with(MemoryBackend::with_chains([]), EngineConfig::default())
}

fn set(subjects: &[Subject]) -> BTreeSet<Subject> {
    subjects.iter().copied().collect()
}

// ============================================================================
// Convergence
// ============================================================================

mod convergence {
    use super::*;

    #[tokio::test]
    async fn clean_apply_leaves_nothing_to_plan() {
        let h = harness();
        let desired = fixtures::wifi_only_all(&fixtures::apps(1, 10));

        let outcome = h
            .engine
            .submit_desired_policies(desired.clone(), PlanScope::Full, NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.summary.applied_uids, 10);
        assert_eq!(outcome.summary.restricted_uids, 10);
        assert!(outcome.is_clean());

        let replan = h.engine.plan(&desired, PlanScope::Full).await.unwrap();
        assert!(replan.plan.is_empty(), "{:?}", replan.plan);
    }

    #[tokio::test]
    async fn progress_reports_every_item() {
        let h = harness();
        let progress = RecordingProgress::new();
        h.engine
            .submit_desired_policies(
                fixtures::wifi_only_all(&fixtures::apps(1, 3)),
                PlanScope::Full,
                progress.sink(),
            )
            .await
            .unwrap();
        assert_eq!(progress.updates(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn policy_relaxed_to_unrestricted_removes_chain() {
        let h = harness();
        let subject = fixtures::app(42);
        h.engine
            .submit_desired_policies(vec![fixtures::wifi_only(subject)], PlanScope::Full, NoProgress)
            .await
            .unwrap();
        assert!(h.backend.chain(subject).is_some());

        let outcome = h
            .engine
            .submit_desired_policies(vec![fixtures::allow_all(subject)], PlanScope::Full, NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.summary.restricted_uids, 0);
        assert!(h.backend.chain(subject).is_none());
        assert!(h.store.snapshot().signatures.is_empty());
    }

    #[tokio::test]
    async fn changed_paths_replace_the_chain() {
        let h = harness();
        let subject = fixtures::app(11);
        h.engine
            .submit_desired_policies(vec![fixtures::wifi_only(subject)], PlanScope::Full, NoProgress)
            .await
            .unwrap();

        let cellular = fixtures::cellular_only(subject);
        let replan = h
            .engine
            .plan(std::slice::from_ref(&cellular), PlanScope::Full)
            .await
            .unwrap();
        assert_eq!(replan.plan.upsert, vec![cellular.clone()]);

        h.engine
            .submit_desired_policies(vec![cellular.clone()], PlanScope::Full, NoProgress)
            .await
            .unwrap();
        assert_eq!(h.backend.chain(subject), Some(compile_spec(&cellular)));
        assert_eq!(h.store.snapshot().signatures[&subject], cellular.signature());
    }

    #[tokio::test]
    async fn live_drift_is_repaired() {
        let h = harness();
        let subject = fixtures::app(7);
        let policy = fixtures::wifi_only(subject);
        h.engine
            .submit_desired_policies(vec![policy.clone()], PlanScope::Full, NoProgress)
            .await
            .unwrap();
        h.backend
            .tamper(subject, ChainSpec::from(vec![Directive::RejectAll]));

        let outcome = h
            .engine
            .submit_desired_policies(vec![policy.clone()], PlanScope::Full, NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.summary.total_uids, 1);
        assert_eq!(h.backend.chain(subject), Some(compile_spec(&policy)));
    }

    #[tokio::test]
    async fn repository_contents_are_applied() {
        let h = harness();
        h.repo.put(fixtures::deny_all(fixtures::app(1))).unwrap();
        h.repo.put(fixtures::allow_all(fixtures::app(2))).unwrap();
        let outcome = h.engine.apply_repository(NoProgress).await.unwrap();
        assert_eq!(outcome.summary.restricted_uids, 1);
        assert_eq!(
            h.store.snapshot().blocked,
            set(&[fixtures::app(1)])
        );
    }
}

// ============================================================================
// Failure handling
// ============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn one_failed_subject_keeps_snapshot_unchanged() {
        let h = harness();
        let (a, b) = (fixtures::app(1), fixtures::app(2));
        h.backend.fail_install(a);

        let outcome = h
            .engine
            .submit_desired_policies(
                vec![fixtures::deny_all(a), fixtures::deny_all(b)],
                PlanScope::Full,
                NoProgress,
            )
            .await
            .unwrap();
        assert_eq!(outcome.summary.failed_uids, 1);
        assert_eq!(outcome.summary.applied_uids, 1);
        assert_eq!(outcome.failed_subjects().collect::<Vec<_>>(), vec![a]);
        assert!(h.store.snapshot().signatures.is_empty());

        h.backend.heal();
        let retry = h
            .engine
            .submit_desired_policies(
                vec![fixtures::deny_all(a), fixtures::deny_all(b)],
                PlanScope::Full,
                NoProgress,
            )
            .await
            .unwrap();
        assert!(retry.is_clean());
        assert_eq!(h.store.snapshot().signatures.len(), 2);
    }

    #[tokio::test]
    async fn setup_failure_applies_nothing() {
        let h = harness();
        h.backend.fail_setup(true);
        let err = h
            .engine
            .submit_desired_policies(
                vec![fixtures::deny_all(fixtures::app(1))],
                PlanScope::Full,
                NoProgress,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SetupFailure(_)));
        assert!(h.backend.subject_ops().is_empty());
        assert!(h.store.snapshot().signatures.is_empty());
    }
}

// ============================================================================
// Orphans
// ============================================================================

mod orphans {
    use super::*;

    #[tokio::test]
    async fn uninstalled_subject_is_removed_and_scrubbed() {
        let h = harness();
        let (kept, gone) = (fixtures::app(1), fixtures::app(2));
        h.engine
            .submit_desired_policies(
                vec![fixtures::deny_all(kept), fixtures::deny_all(gone)],
                PlanScope::Full,
                NoProgress,
            )
            .await
            .unwrap();
        assert!(h.store.snapshot().blocked.contains(&gone));

        let pass = h.engine.reconcile_orphans(set(&[kept])).await.unwrap();
        let OrphanPass::Ran { orphans, outcome } = pass else {
            panic!("expected the orphan pass to run");
        };
        assert_eq!(orphans, set(&[gone]));
        assert!(outcome.is_clean());
        assert!(h.backend.chain(gone).is_none());
        assert!(h.backend.chain(kept).is_some());

        let state = h.store.snapshot();
        assert!(!state.signatures.contains_key(&gone));
        assert!(!state.blocked.contains(&gone));
        assert!(state.signatures.contains_key(&kept));
    }

    #[tokio::test]
    async fn managed_protected_subject_is_always_an_orphan() {
        let system = fixtures::system(1_000);
        let h = harness_with(
            MemoryBackend::with_chains([(system, ChainSpec::from(vec![Directive::RejectAll]))]),
            EngineConfig::default(),
        );
        let pass = h.engine.reconcile_orphans(set(&[system])).await.unwrap();
        assert!(matches!(pass, OrphanPass::Ran { ref orphans, .. } if orphans.contains(&system)));
        assert!(h.backend.chain(system).is_none());
    }

    #[tokio::test]
    async fn empty_inventory_skips_the_pass() {
        let h = harness();
        h.engine
            .submit_desired_policies(
                vec![fixtures::deny_all(fixtures::app(1))],
                PlanScope::Full,
                NoProgress,
            )
            .await
            .unwrap();
        let pass = h.engine.reconcile_orphans(BTreeSet::new()).await.unwrap();
        assert_eq!(
            pass,
            OrphanPass::Skipped {
                reason: SkipReason::EmptyInventory
            }
        );
        assert!(h.backend.chain(fixtures::app(1)).is_some());
    }

    #[tokio::test]
    async fn nothing_managed_skips_the_pass() {
        let h = harness();
        let pass = h
            .engine
            .orphan_reconciler(Arc::new(StaticInventory::new([fixtures::app(1)])))
            .run_once()
            .await
            .unwrap();
        assert_eq!(
            pass,
            OrphanPass::Skipped {
                reason: SkipReason::NothingManaged
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_exits_once_engine_is_shut_down() {
        let h = harness();
        let sweeper = h
            .engine
            .orphan_reconciler(Arc::new(StaticInventory::new([fixtures::app(1)])))
            .spawn_sweeper(std::time::Duration::from_secs(60));
        h.engine.shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(300), sweeper)
            .await
            .expect("sweeper still running after shutdown")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_orphans_on_its_interval() {
        let h = harness();
        let gone = fixtures::app(9);
        h.engine
            .submit_desired_policies(vec![fixtures::deny_all(gone)], PlanScope::Full, NoProgress)
            .await
            .unwrap();

        let sweeper = h
            .engine
            .orphan_reconciler(Arc::new(StaticInventory::new([fixtures::app(1)])))
            .spawn_sweeper(std::time::Duration::from_secs(60));
        for _ in 0..50 {
            if h.backend.chain(gone).is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        sweeper.abort();
        assert!(h.backend.chain(gone).is_none());
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn install_while_enforcing_denies_immediately() {
        let h = enforcing_harness();
        let subject = fixtures::app(5);
        let outcome = h.engine.on_subject_installed(subject).await.unwrap();
        assert!(matches!(outcome, InstallOutcome::Denied { applied: Some(_) }));
        assert_eq!(
            h.backend.chain(subject),
            Some(compile_spec(&AppPolicy::deny_all(subject)))
        );
        assert_eq!(h.repo.get(subject).unwrap(), Some(fixtures::deny_all(subject)));
        let state = h.store.snapshot();
        assert!(state.known_subjects.unwrap().contains(&subject));
        assert!(state.blocked.contains(&subject));
    }

    #[tokio::test]
    async fn install_while_not_enforcing_only_records_policy() {
        let h = harness();
        let subject = fixtures::app(5);
        let outcome = h.engine.on_subject_installed(subject).await.unwrap();
        assert_eq!(outcome, InstallOutcome::Denied { applied: None });
        assert!(h.backend.ops().is_empty());
        assert_eq!(h.repo.get(subject).unwrap(), Some(fixtures::deny_all(subject)));
    }

    #[tokio::test]
    async fn protected_install_is_ignored() {
        let h = enforcing_harness();
        let outcome = h
            .engine
            .on_subject_installed(fixtures::system(1_000))
            .await
            .unwrap();
        assert_eq!(outcome, InstallOutcome::Ignored);
        assert!(h.repo.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn removal_deletes_chain_and_forgets_subject() {
        let h = enforcing_harness();
        let subject = fixtures::app(5);
        h.engine.on_subject_installed(subject).await.unwrap();

        let removed = h.engine.on_subject_removed(subject).await.unwrap();
        assert!(removed.is_clean());
        assert!(h.backend.chain(subject).is_none());
        assert_eq!(h.repo.get(subject).unwrap(), None);
        let state = h.store.snapshot();
        assert!(!state.signatures.contains_key(&subject));
        assert!(!state.blocked.contains(&subject));
        assert!(!state.known_subjects.unwrap().contains(&subject));
    }

    #[tokio::test]
    async fn removal_is_sent_even_when_listing_fails() {
        let h = enforcing_harness();
        let subject = fixtures::app(42);
        h.engine.on_subject_installed(subject).await.unwrap();
        assert!(h.backend.chain(subject).is_some());

        h.backend.fail_listing(true);
        let removed = h.engine.on_subject_removed(subject).await.unwrap();
        assert!(removed.is_clean());
        assert!(h.backend.chain(subject).is_none());
        assert!(!h.store.snapshot().signatures.contains_key(&subject));
    }

    #[tokio::test]
    async fn removal_of_unknown_subject_leaves_hooks_alone() {
        let h = harness();
        let subject = fixtures::app(3);
        let removed = h.engine.on_subject_removed(subject).await.unwrap();
        assert!(removed.is_clean());
        assert_eq!(h.backend.ops(), vec![BackendOp::Remove(subject)]);
        assert!(!h.backend.is_hooked());
    }

    #[tokio::test]
    async fn first_sync_bootstraps_without_denying() {
        let h = enforcing_harness();
        let installed = set(&[fixtures::app(1), fixtures::app(2), fixtures::system(1_000)]);
        let report = h.engine.lifecycle().sync_installed(installed).await.unwrap();
        assert_eq!(report.state, LifecycleState::Bootstrap);
        assert!(report.newly_denied.is_empty());
        assert_eq!(report.known, 2);
        assert!(h.repo.load_all().unwrap().is_empty());
        assert!(h.backend.chains().is_empty());
    }

    #[tokio::test]
    async fn steady_sync_denies_only_new_subjects_without_policy() {
        let h = enforcing_harness();
        let lifecycle = h.engine.lifecycle();
        lifecycle
            .sync_installed(set(&[fixtures::app(1)]))
            .await
            .unwrap();
        h.repo.put(fixtures::wifi_only(fixtures::app(3))).unwrap();

        let report = lifecycle
            .sync_installed(set(&[fixtures::app(1), fixtures::app(2), fixtures::app(3)]))
            .await
            .unwrap();
        assert_eq!(report.state, LifecycleState::Steady);
        assert_eq!(report.newly_denied, set(&[fixtures::app(2)]));
        assert!(report.applied.is_some());
        assert!(h.backend.chain(fixtures::app(2)).is_some());
        assert!(h.backend.chain(fixtures::app(1)).is_none());
        assert_eq!(report.known, 3);
    }
}

// ============================================================================
// Run admission
// ============================================================================

/// Backend whose setup call parks until released.
struct GatedBackend {
    inner: MemoryBackend,
    entered: Notify,
    release: Semaphore,
}

impl GatedBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl FilterBackend for GatedBackend {
    async fn ensure_containers(&self) -> BackendResult<()> {
        self.entered.notify_one();
        let _permit = self.release.acquire().await;
        self.inner.ensure_containers().await
    }

    async fn install_chain(&self, subject: Subject, spec: &ChainSpec) -> BackendResult<()> {
        self.inner.install_chain(subject, spec).await
    }

    async fn remove_chain(&self, subject: Subject) -> BackendResult<()> {
        self.inner.remove_chain(subject).await
    }

    async fn list_managed_subjects(&self) -> BackendResult<BTreeSet<Subject>> {
        self.inner.list_managed_subjects().await
    }

    async fn read_chain(&self, subject: Subject) -> BackendResult<ChainSpec> {
        self.inner.read_chain(subject).await
    }

    async fn is_enforcing(&self) -> BackendResult<bool> {
        self.inner.is_enforcing().await
    }

    async fn clear_all(&self) -> BackendResult<()> {
        self.inner.clear_all().await
    }
}

fn gated_engine(admission: RunAdmission) -> (ReconciliationEngine, Arc<GatedBackend>) {
    init_test_tracing();
    let backend = Arc::new(GatedBackend::new());
    let engine = ReconciliationEngine::new(
        backend.clone(),
        Arc::new(MemoryStateStore::new()),
        Arc::new(MemoryPolicyRepository::new()),
        EngineConfig::default().with_admission(admission),
    );
    (engine, backend)
}

mod admission {
    use super::*;

    #[tokio::test]
    async fn reject_admission_refuses_concurrent_run() {
        let (engine, backend) = gated_engine(RunAdmission::Reject);
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit_desired_policies(
                        vec![fixtures::deny_all(fixtures::app(1))],
                        PlanScope::Full,
                        NoProgress,
                    )
                    .await
            })
        };
        backend.entered.notified().await;

        let err = engine
            .submit_desired_policies(Vec::new(), PlanScope::Full, NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RunInProgress));

        backend.release.add_permits(1);
        assert!(running.await.unwrap().unwrap().is_clean());
    }

    #[tokio::test]
    async fn rejected_install_still_records_default_deny() {
        let (engine, backend) = gated_engine(RunAdmission::Reject);
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit_desired_policies(Vec::new(), PlanScope::Full, NoProgress)
                    .await
            })
        };
        backend.entered.notified().await;

        let subject = fixtures::app(9);
        let err = engine.on_subject_installed(subject).await.unwrap_err();
        assert!(matches!(err, EngineError::RunInProgress));
        assert_eq!(
            engine.repository().get(subject).unwrap(),
            Some(fixtures::deny_all(subject))
        );
        assert_eq!(engine.status().await.unwrap().known_subjects, Some(1));

        backend.release.add_permits(1);
        running.await.unwrap().unwrap();
        engine.apply_repository(NoProgress).await.unwrap();
        assert_eq!(
            backend.inner.chain(subject),
            Some(compile_spec(&fixtures::deny_all(subject)))
        );
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_running_pass() {
        let (engine, backend) = gated_engine(RunAdmission::Queue);
        let subject = fixtures::app(1);
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit_desired_policies(
                        vec![fixtures::deny_all(subject)],
                        PlanScope::Full,
                        NoProgress,
                    )
                    .await
            })
        };
        backend.entered.notified().await;

        let shutdown = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.shutdown().await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!shutdown.is_finished());

        backend.release.add_permits(1);
        shutdown.await.unwrap();
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.summary.applied_uids, 1);
        assert!(backend.inner.chain(subject).is_some());

        let err = engine
            .submit_desired_policies(Vec::new(), PlanScope::Full, NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ShutDown));
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_the_run() {
        let (engine, backend) = gated_engine(RunAdmission::Queue);
        let subject = fixtures::app(1);
        let caller = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit_desired_policies(
                        vec![fixtures::deny_all(subject)],
                        PlanScope::Full,
                        NoProgress,
                    )
                    .await
            })
        };
        backend.entered.notified().await;
        caller.abort();
        backend.release.add_permits(1);

        // Queues behind the detached run, then observes its result.
        engine
            .reconcile_orphans(set(&[subject]))
            .await
            .unwrap();
        assert!(backend.inner.chain(subject).is_some());
        assert!(
            backend
                .inner
                .subject_ops()
                .contains(&BackendOp::Install(subject))
        );
    }
}

// ============================================================================
// Disable and persistence
// ============================================================================

mod persistence {
    use super::*;

    #[tokio::test]
    async fn disable_tears_down_and_forgets_snapshot() {
        let h = harness();
        h.engine
            .submit_desired_policies(
                vec![fixtures::deny_all(fixtures::app(1))],
                PlanScope::Full,
                NoProgress,
            )
            .await
            .unwrap();
        assert!(h.engine.status().await.unwrap().enforcing);

        h.engine.disable().await.unwrap();
        let status = h.engine.status().await.unwrap();
        assert!(!status.enforcing);
        assert!(status.managed.is_empty());
        assert_eq!(status.snapshot_entries, 0);
        assert!(status.blocked.is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_engine_restart() {
        init_test_tracing();
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("engine_state.json");
        let backend = Arc::new(MemoryBackend::new());
        let desired = fixtures::wifi_only_all(&fixtures::apps(1, 3));

        let first = ReconciliationEngine::new(
            backend.clone(),
            Arc::new(FileStateStore::new(&state_path)),
            Arc::new(MemoryPolicyRepository::new()),
            EngineConfig::default(),
        );
        first
            .submit_desired_policies(desired.clone(), PlanScope::Full, NoProgress)
            .await
            .unwrap();
        drop(first);

        let store = FileStateStore::new(&state_path);
        assert_eq!(store.load().unwrap().signatures.len(), 3);
        let second = ReconciliationEngine::new(
            backend,
            Arc::new(store),
            Arc::new(MemoryPolicyRepository::new()),
            EngineConfig::default(),
        );
        assert!(second
            .plan(&desired, PlanScope::Full)
            .await
            .unwrap()
            .plan
            .is_empty());
    }
}

//! Incremental executor.
//!
//! Applies a [`ReconciliationPlan`] one subject at a time. Per-subject
//! failures are recorded and the run goes on; only failing to set up the
//! container chains aborts a run.

use std::collections::BTreeSet;
use std::time::Instant;

use fwa_backend::FilterBackend;
use fwa_core::{ApplySummary, Subject, compile_spec, normalize_vendor_aliases};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    EngineError, LiveStateInspector, ProgressSink, ReconciliationPlan, SubjectFailure,
    SubjectOperation,
};

/// Result of applying a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub summary: ApplySummary,
    pub failures: Vec<SubjectFailure>,
}

impl ApplyOutcome {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.summary.is_clean()
    }

    /// Subjects whose operation failed.
    pub fn failed_subjects(&self) -> impl Iterator<Item = Subject> + '_ {
        self.failures.iter().map(|f| f.subject)
    }
}

/// Applies plans against a backend.
#[derive(Clone, Copy)]
pub struct IncrementalExecutor<'a> {
    backend: &'a dyn FilterBackend,
}

impl<'a> IncrementalExecutor<'a> {
    #[must_use]
    pub const fn new(backend: &'a dyn FilterBackend) -> Self {
        Self { backend }
    }

    /// Apply `plan`: removals first, then upserts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SetupFailure`] if the container chains cannot
    /// be set up. Per-subject failures are reported in the outcome instead.
    pub async fn apply(
        &self,
        plan: &ReconciliationPlan,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyOutcome, EngineError> {
        let started = Instant::now();
        self.backend
            .ensure_containers()
            .await
            .map_err(EngineError::SetupFailure)?;

        let total = plan.total();
        let mut outcome = ApplyOutcome {
            summary: ApplySummary::new(total, plan.upsert.len()),
            failures: Vec::new(),
        };

        for &subject in &plan.remove {
            let result = self.backend.remove_chain(subject).await;
            self.record(&mut outcome, subject, SubjectOperation::Remove, result);
            progress.on_progress(outcome.summary.processed_uids, total);
        }

        for policy in &plan.upsert {
            let spec = compile_spec(policy);
            let result = if spec.is_empty() {
                self.backend.remove_chain(policy.subject).await
            } else {
                self.backend.install_chain(policy.subject, &spec).await
            };
            self.record(&mut outcome, policy.subject, SubjectOperation::Upsert, result);
            progress.on_progress(outcome.summary.processed_uids, total);
        }

        if let Err(error) = self.backend.ensure_containers().await {
            warn!(%error, "Failed to re-assert enforcement hooks after run");
        }
        self.normalize_aliases().await;

        let s = &outcome.summary;
        info!(
            total = s.total_uids,
            applied = s.applied_uids,
            failed = s.failed_uids,
            restricted = s.restricted_uids,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Apply finished"
        );
        Ok(outcome)
    }

    /// Remove the chains of `subjects` without setting up or re-asserting
    /// the container hooks.
    ///
    /// Chain removal is idempotent, so a subject without a chain counts as
    /// applied.
    pub async fn remove_chains(&self, subjects: &BTreeSet<Subject>) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            summary: ApplySummary::new(subjects.len(), 0),
            failures: Vec::new(),
        };
        for &subject in subjects {
            let result = self.backend.remove_chain(subject).await;
            self.record(&mut outcome, subject, SubjectOperation::Remove, result);
        }
        outcome
    }

    #[allow(clippy::unused_self)]
    fn record(
        &self,
        outcome: &mut ApplyOutcome,
        subject: Subject,
        operation: SubjectOperation,
        result: Result<(), fwa_backend::BackendError>,
    ) {
        match result {
            Ok(()) => {
                debug!(%subject, ?operation, "Subject applied");
                outcome.summary.record_success();
            }
            Err(error) => {
                warn!(%subject, ?operation, %error, "Subject operation failed");
                outcome.summary.record_failure();
                outcome.failures.push(SubjectFailure {
                    subject,
                    operation,
                    error,
                });
            }
        }
    }

    /// Give every live chain that returns on some mobile alias all of them.
    ///
    /// Some devices rename the active mobile interface at runtime; the
    /// policy does not change, so the planner would never notice.
    pub async fn normalize_aliases(&self) -> usize {
        let live = LiveStateInspector::new(self.backend);
        let mut fixed = 0;
        for subject in live.list_managed_subjects().await {
            let current = live.read_chain_spec(subject).await;
            let Some(normalized) = normalize_vendor_aliases(&current) else {
                continue;
            };
            match self.backend.install_chain(subject, &normalized).await {
                Ok(()) => {
                    debug!(%subject, "Filled in missing interface aliases");
                    fixed += 1;
                }
                Err(error) => warn!(%subject, %error, "Alias normalization failed"),
            }
        }
        fixed
    }
}

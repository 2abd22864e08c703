//! Reconciliation planner.
//!
//! Computes the minimal set of per-subject operations that takes the live
//! state to the desired one:
//!
//! ```text
//! restricted = dedupe(desired - protected) where !unrestricted
//! remove     = (managed - restricted) + (managed & protected)     [Full]
//!            = (managed & submitted_unrestricted) + (managed & protected)  [Delta]
//! upsert     = restricted where signature changed | not managed | chain drifted
//! ```

use std::collections::{BTreeMap, BTreeSet};

use fwa_core::{AppPolicy, PolicySignature, ProtectedRange, Subject, compile_spec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LiveStateInspector;

/// How much of the live state a submission speaks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    /// The submission is the complete desired state; anything managed and
    /// not desired-restricted is removed.
    #[default]
    Full,
    /// The submission covers only the subjects it names.
    Delta,
}

/// Per-subject operations for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub upsert: Vec<AppPolicy>,
    pub remove: BTreeSet<Subject>,
}

impl ReconciliationPlan {
    /// Plan that only removes the given subjects.
    #[must_use]
    pub fn removal(subjects: impl IntoIterator<Item = Subject>) -> Self {
        Self {
            upsert: Vec::new(),
            remove: subjects.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }

    /// `|upsert| + |remove|`.
    #[must_use]
    pub fn total(&self) -> usize {
        self.upsert.len() + self.remove.len()
    }
}

/// A plan plus what the caller needs to commit the snapshot afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedRun {
    pub plan: ReconciliationPlan,
    /// Manageable restricted policies, deduplicated, keyed by subject.
    pub restricted: BTreeMap<Subject, AppPolicy>,
    /// Manageable submitted subjects whose policy needs no chain.
    pub unrestricted: BTreeSet<Subject>,
}

/// Compute the plan for `desired` against the live state.
///
/// Duplicate subjects keep their first policy. Protected subjects are never
/// upserted, but are removed when found managed.
pub async fn plan(
    desired: &[AppPolicy],
    signatures: &BTreeMap<Subject, PolicySignature>,
    live: &LiveStateInspector<'_>,
    range: ProtectedRange,
    scope: PlanScope,
) -> PlannedRun {
    let mut restricted = BTreeMap::new();
    let mut unrestricted = BTreeSet::new();
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    for policy in desired {
        if range.is_protected(policy.subject) || !seen.insert(policy.subject) {
            continue;
        }
        if policy.is_unrestricted() {
            unrestricted.insert(policy.subject);
        } else {
            order.push(policy.subject);
            restricted.insert(policy.subject, policy.clone());
        }
    }

    let managed = live.list_managed_subjects().await;
    let protected_managed = managed.iter().copied().filter(|s| range.is_protected(*s));

    let mut remove: BTreeSet<Subject> = match scope {
        PlanScope::Full => managed
            .iter()
            .copied()
            .filter(|s| !restricted.contains_key(s))
            .collect(),
        PlanScope::Delta => managed.intersection(&unrestricted).copied().collect(),
    };
    remove.extend(protected_managed);

    let mut upsert = Vec::new();
    for subject in order {
        let policy = &restricted[&subject];
        let reason = if signatures.get(&subject) != Some(&policy.signature()) {
            Some("signature changed")
        } else if !managed.contains(&subject) {
            Some("not managed")
        } else if live.read_chain_spec(subject).await != compile_spec(policy) {
            Some("chain drifted")
        } else {
            None
        };
        if let Some(reason) = reason {
            debug!(%subject, reason, "Subject needs upsert");
            upsert.push(policy.clone());
        }
    }

    PlannedRun {
        plan: ReconciliationPlan { upsert, remove },
        restricted,
        unrestricted,
    }
}

#[cfg(test)]
mod tests {
    use fwa_backend::{FilterBackend, MemoryBackend};
    use fwa_core::{ChainSpec, Directive, NetworkPathCapability, compile};

    use super::*;

    fn s(id: u32) -> Subject {
        Subject::new(id)
    }

    fn wifi(id: u32) -> AppPolicy {
        AppPolicy::with_paths(s(id), [NetworkPathCapability::WiFi])
    }

    async fn converged(policies: &[AppPolicy]) -> (MemoryBackend, BTreeMap<Subject, PolicySignature>) {
        let backend = MemoryBackend::new();
        let mut sigs = BTreeMap::new();
        for policy in policies {
            let (spec, sig) = compile(policy);
            backend.install_chain(policy.subject, &spec).await.unwrap();
            sigs.insert(policy.subject, sig);
        }
        (backend, sigs)
    }

    #[tokio::test]
    async fn first_run_upserts_every_restricted_subject() {
        let backend = MemoryBackend::new();
        let desired = vec![wifi(10_001), AppPolicy::allow_all(s(10_002))];
        let run = plan(
            &desired,
            &BTreeMap::new(),
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Full,
        )
        .await;
        assert_eq!(run.plan.upsert, vec![wifi(10_001)]);
        assert!(run.plan.remove.is_empty());
        assert_eq!(run.unrestricted, BTreeSet::from([s(10_002)]));
    }

    #[tokio::test]
    async fn subject_changed_to_unrestricted_is_removed() {
        let (backend, sigs) = converged(&[wifi(10_042)]).await;
        let run = plan(
            &[AppPolicy::allow_all(s(10_042))],
            &sigs,
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Full,
        )
        .await;
        assert!(run.plan.upsert.is_empty());
        assert_eq!(run.plan.remove, BTreeSet::from([s(10_042)]));
    }

    #[tokio::test]
    async fn only_changed_or_drifted_subjects_are_upserted() {
        let desired: Vec<AppPolicy> = (0..10).map(|i| wifi(10_000 + i)).collect();
        let (backend, mut sigs) = converged(&desired[..3]).await;
        // Third converged subject drifts live.
        backend.tamper(s(10_002), ChainSpec::from(vec![Directive::RejectAll]));
        sigs.insert(s(10_003), desired[3].signature());

        let run = plan(
            &desired,
            &sigs,
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Full,
        )
        .await;
        let upserted: Vec<Subject> = run.plan.upsert.iter().map(|p| p.subject).collect();
        assert_eq!(upserted.len(), 8);
        assert!(!upserted.contains(&s(10_000)));
        assert!(!upserted.contains(&s(10_001)));
        assert!(upserted.contains(&s(10_002)));
        assert!(upserted.contains(&s(10_003)));
        assert!(run.plan.remove.is_empty());
    }

    #[tokio::test]
    async fn protected_subjects_are_removed_never_upserted() {
        let (backend, sigs) = converged(&[AppPolicy::deny_all(s(1_000))]).await;
        let run = plan(
            &[AppPolicy::deny_all(s(1_000)), AppPolicy::deny_all(s(9_999))],
            &sigs,
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Delta,
        )
        .await;
        assert!(run.plan.upsert.is_empty());
        assert_eq!(run.plan.remove, BTreeSet::from([s(1_000)]));
        assert!(run.restricted.is_empty());
    }

    #[tokio::test]
    async fn duplicate_subjects_keep_first_policy() {
        let backend = MemoryBackend::new();
        let first = AppPolicy::deny_all(s(10_001));
        let run = plan(
            &[first.clone(), wifi(10_001)],
            &BTreeMap::new(),
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Full,
        )
        .await;
        assert_eq!(run.plan.upsert, vec![first]);
    }

    #[tokio::test]
    async fn delta_leaves_unmentioned_managed_subjects_alone() {
        let (backend, sigs) = converged(&[wifi(10_001), wifi(10_002)]).await;
        let run = plan(
            &[AppPolicy::allow_all(s(10_002)), AppPolicy::deny_all(s(10_003))],
            &sigs,
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Delta,
        )
        .await;
        assert_eq!(run.plan.remove, BTreeSet::from([s(10_002)]));
        assert_eq!(run.plan.upsert, vec![AppPolicy::deny_all(s(10_003))]);
    }

    #[tokio::test]
    async fn unreadable_live_state_plans_as_if_absent() {
        let (backend, sigs) = converged(&[wifi(10_001)]).await;
        backend.fail_listing(true);
        let run = plan(
            &[wifi(10_001)],
            &sigs,
            &LiveStateInspector::new(&backend),
            ProtectedRange::default(),
            PlanScope::Full,
        )
        .await;
        assert_eq!(run.plan.upsert, vec![wifi(10_001)]);
        assert!(run.plan.remove.is_empty());
    }
}

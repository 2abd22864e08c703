//! Test fixtures for subjects and policies.

use fwa_core::{AppPolicy, NetworkPathCapability, Subject};

// ─────────────────────────────────────────────────────────────────────────────
// Subjects
// ─────────────────────────────────────────────────────────────────────────────

/// First manageable subject id under the default protected range.
pub const FIRST_APP_ID: u32 = 10_000;

/// The `n`th manageable subject.
#[must_use]
pub const fn app(n: u32) -> Subject {
    Subject::new(FIRST_APP_ID + n)
}

/// A protected (system) subject.
#[must_use]
pub const fn system(id: u32) -> Subject {
    Subject::new(id % FIRST_APP_ID)
}

/// `count` consecutive manageable subjects starting at `app(first)`.
#[must_use]
pub fn apps(first: u32, count: u32) -> Vec<Subject> {
    (first..first + count).map(app).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

#[must_use]
pub const fn deny_all(subject: Subject) -> AppPolicy {
    AppPolicy::deny_all(subject)
}

#[must_use]
pub fn allow_all(subject: Subject) -> AppPolicy {
    AppPolicy::allow_all(subject)
}

#[must_use]
pub fn wifi_only(subject: Subject) -> AppPolicy {
    AppPolicy::with_paths(subject, [NetworkPathCapability::WiFi])
}

#[must_use]
pub fn cellular_only(subject: Subject) -> AppPolicy {
    AppPolicy::with_paths(subject, [NetworkPathCapability::Cellular])
}

/// One restricted wifi-only policy per subject.
#[must_use]
pub fn wifi_only_all(subjects: &[Subject]) -> Vec<AppPolicy> {
    subjects.iter().copied().map(wifi_only).collect()
}

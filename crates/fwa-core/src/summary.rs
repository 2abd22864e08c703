//! Run summaries.

use serde::{Deserialize, Serialize};

/// Terminal counters of one apply run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    /// Subjects the plan touched (`|upsert| + |remove|`).
    pub total_uids: usize,
    /// Subjects attempted so far.
    pub processed_uids: usize,
    /// Subjects that received a chain (`|upsert|`).
    pub restricted_uids: usize,
    /// Subjects whose operation succeeded.
    pub applied_uids: usize,
    /// Subjects whose operation failed.
    pub failed_uids: usize,
}

impl ApplySummary {
    #[must_use]
    pub const fn new(total_uids: usize, restricted_uids: usize) -> Self {
        Self {
            total_uids,
            processed_uids: 0,
            restricted_uids,
            applied_uids: 0,
            failed_uids: 0,
        }
    }

    /// Returns true if every attempted operation succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed_uids == 0
    }

    pub const fn record_success(&mut self) {
        self.processed_uids += 1;
        self.applied_uids += 1;
    }

    pub const fn record_failure(&mut self) {
        self.processed_uids += 1;
        self.failed_uids += 1;
    }
}

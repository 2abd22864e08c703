//! Error types for filter backends.

use std::time::Duration;

use fwa_core::Subject;
use thiserror::Error;

/// Backend operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to spawn privileged shell: {0}")]
    Spawn(String),

    #[error("privileged command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command exited with status {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("directive cannot be rendered for subject {subject}: {directive}")]
    Unrenderable { subject: Subject, directive: String },

    #[error("injected failure: {0}")]
    Injected(String),
}

impl BackendError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::Timeout(_))
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

//! Error types for the reconciliation engine.

use std::path::PathBuf;

use fwa_backend::BackendError;
use fwa_core::Subject;
use serde::Serialize;
use thiserror::Error;

/// Engine errors.
///
/// Per-subject failures are not errors at this level: they are collected into
/// [`SubjectFailure`]s and reported through the run summary.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Container chains could not be created or hooked. Nothing was applied.
    #[error("enforcement setup failed: {0}")]
    SetupFailure(#[source] BackendError),

    #[error("a reconciliation run is already in progress")]
    RunInProgress,

    /// The engine was shut down; no further runs are admitted.
    #[error("reconciliation engine is shut down")]
    ShutDown,

    #[error(transparent)]
    State(#[from] StateError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("run task failed: {0}")]
    Task(String),
}

/// Persistence errors for engine state and the policy repository.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which per-subject operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectOperation {
    Upsert,
    Remove,
}

/// A per-subject operation that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectFailure {
    pub subject: Subject,
    pub operation: SubjectOperation,
    #[serde(serialize_with = "display")]
    pub error: BackendError,
}

fn display<S: serde::Serializer>(error: &BackendError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

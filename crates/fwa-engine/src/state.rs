//! Persisted engine state.
//!
//! One JSON document holds everything the engine remembers between runs:
//! the signature snapshot of the last clean run, the cached list of subjects
//! whose policy denies all traffic, and the set of subjects already seen by
//! the lifecycle adapter. Writes go through a temp file and an atomic rename.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fwa_core::{AppPolicy, PolicySignature, Subject};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{PlanScope, PlannedRun, StateError};

/// Everything the engine persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Signatures of the restricted policies applied by the last clean run.
    #[serde(default)]
    pub signatures: BTreeMap<Subject, PolicySignature>,

    /// Subjects whose applied policy lets no traffic out.
    #[serde(default)]
    pub blocked: BTreeSet<Subject>,

    /// Subjects the lifecycle adapter has seen. `None` until the first sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_subjects: Option<BTreeSet<Subject>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EngineState {
    /// Record the outcome of a zero-failure run.
    ///
    /// A full run replaces the snapshot. A delta run only touches the
    /// subjects it was handed.
    pub fn commit(&mut self, scope: PlanScope, run: &PlannedRun) {
        match scope {
            PlanScope::Full => {
                self.signatures.clear();
                self.blocked.clear();
            }
            PlanScope::Delta => {
                for subject in &run.unrestricted {
                    self.signatures.remove(subject);
                    self.blocked.remove(subject);
                }
            }
        }
        for policy in run.restricted.values() {
            self.record_policy(policy);
        }
        self.touch();
    }

    fn record_policy(&mut self, policy: &AppPolicy) {
        self.signatures.insert(policy.subject, policy.signature());
        if policy.denies_all_traffic() {
            self.blocked.insert(policy.subject);
        } else {
            self.blocked.remove(&policy.subject);
        }
    }

    /// Drop every shadow entry for the given subjects.
    pub fn scrub<'a>(&mut self, subjects: impl IntoIterator<Item = &'a Subject>) {
        for subject in subjects {
            self.signatures.remove(subject);
            self.blocked.remove(subject);
        }
        self.touch();
    }

    /// Forget the snapshot entirely (enforcement disabled).
    pub fn clear_snapshot(&mut self) {
        self.signatures.clear();
        self.blocked.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Load/save seam for [`EngineState`].
pub trait StateStore: Send + Sync {
    /// Load the state; a missing document yields the default state.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the document exists but cannot be read or
    /// parsed.
    fn load(&self) -> Result<EngineState, StateError>;

    /// Replace the stored state.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the state cannot be written.
    fn save(&self, state: &EngineState) -> Result<(), StateError>;
}

/// State kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<EngineState>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: EngineState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineState {
        self.state.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<EngineState, StateError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &EngineState) -> Result<(), StateError> {
        *self.state.lock() = state.clone();
        Ok(())
    }
}

/// State stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<EngineState, StateError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, state: &EngineState) -> Result<(), StateError> {
        write_json_atomic(&self.path, state)
    }
}

// ============================================================================
// JSON file helpers
// ============================================================================

/// Read a JSON document; `None` if the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StateError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document via temp file, fsync and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(value)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.as_file_mut().write_all(&bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "State written");
    Ok(())
}

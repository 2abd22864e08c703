//! Per-subject policy repository.
//!
//! Holds the declared policy of every subject the agent knows about. The UI
//! edits it; the lifecycle adapter writes default-deny entries for new
//! subjects and deletes entries of removed ones.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fwa_core::{AppPolicy, Subject};
use parking_lot::{Mutex, RwLock};

use crate::StateError;
use crate::state::{read_json, write_json_atomic};

/// Storage seam for declared policies.
pub trait PolicyRepository: Send + Sync {
    /// Every stored policy, ordered by subject.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the backing store cannot be read.
    fn load_all(&self) -> Result<Vec<AppPolicy>, StateError>;

    /// # Errors
    ///
    /// Returns a [`StateError`] if the backing store cannot be read.
    fn get(&self, subject: Subject) -> Result<Option<AppPolicy>, StateError>;

    /// Insert or replace the subject's policy.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the backing store cannot be written.
    fn put(&self, policy: AppPolicy) -> Result<(), StateError>;

    /// Delete the subject's policy; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the backing store cannot be written.
    fn delete(&self, subject: Subject) -> Result<bool, StateError>;
}

/// Repository kept in memory.
#[derive(Debug, Default)]
pub struct MemoryPolicyRepository {
    policies: RwLock<BTreeMap<Subject, AppPolicy>>,
}

impl MemoryPolicyRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policies(policies: impl IntoIterator<Item = AppPolicy>) -> Self {
        Self {
            policies: RwLock::new(policies.into_iter().map(|p| (p.subject, p)).collect()),
        }
    }
}

impl PolicyRepository for MemoryPolicyRepository {
    fn load_all(&self) -> Result<Vec<AppPolicy>, StateError> {
        Ok(self.policies.read().values().cloned().collect())
    }

    fn get(&self, subject: Subject) -> Result<Option<AppPolicy>, StateError> {
        Ok(self.policies.read().get(&subject).cloned())
    }

    fn put(&self, policy: AppPolicy) -> Result<(), StateError> {
        self.policies.write().insert(policy.subject, policy);
        Ok(())
    }

    fn delete(&self, subject: Subject) -> Result<bool, StateError> {
        Ok(self.policies.write().remove(&subject).is_some())
    }
}

/// Repository stored as one JSON map from subject to policy.
#[derive(Debug)]
pub struct FilePolicyRepository {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FilePolicyRepository {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<Subject, AppPolicy>, StateError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

impl PolicyRepository for FilePolicyRepository {
    fn load_all(&self) -> Result<Vec<AppPolicy>, StateError> {
        Ok(self.read_map()?.into_values().collect())
    }

    fn get(&self, subject: Subject) -> Result<Option<AppPolicy>, StateError> {
        Ok(self.read_map()?.remove(&subject))
    }

    fn put(&self, policy: AppPolicy) -> Result<(), StateError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        map.insert(policy.subject, policy);
        write_json_atomic(&self.path, &map)
    }

    fn delete(&self, subject: Subject) -> Result<bool, StateError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        let existed = map.remove(&subject).is_some();
        if existed {
            write_json_atomic(&self.path, &map)?;
        }
        Ok(existed)
    }
}

//! Subject identity and the protected id range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Lowest id the agent is allowed to manage. Ids below it belong to the OS.
pub const DEFAULT_MIN_MANAGED_ID: u32 = 10_000;

/// Principal whose network access is controlled (an OS-assigned uid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(u32);

impl Subject {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl From<u32> for Subject {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Subject {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ModelError::InvalidSubject(s.to_string()))
    }
}

/// Split between protected (system) subjects and manageable ones.
///
/// Protected subjects must never be targeted for chain installation. They may
/// still be removed when found managed live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedRange {
    min_managed_id: u32,
}

impl ProtectedRange {
    #[must_use]
    pub const fn new(min_managed_id: u32) -> Self {
        Self { min_managed_id }
    }

    #[must_use]
    pub const fn min_managed_id(self) -> u32 {
        self.min_managed_id
    }

    /// Returns true if the subject falls below the manageable range.
    #[must_use]
    pub const fn is_protected(self, subject: Subject) -> bool {
        subject.0 < self.min_managed_id
    }

    #[must_use]
    pub const fn is_manageable(self, subject: Subject) -> bool {
        !self.is_protected(subject)
    }
}

impl Default for ProtectedRange {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_MANAGED_ID)
    }
}

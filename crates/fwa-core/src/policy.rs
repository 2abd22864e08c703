//! Application policies and their canonical signatures.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ModelError, NetworkPathCapability, Subject};

/// Declared network access for one subject.
///
/// Policies are values: the engine never mutates a policy it was handed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPolicy {
    pub subject: Subject,
    #[serde(default)]
    pub allowed_paths: BTreeSet<NetworkPathCapability>,
    #[serde(default = "default_true")]
    pub upload_allowed: bool,
    #[serde(default = "default_true")]
    pub download_allowed: bool,
}

const fn default_true() -> bool {
    true
}

impl AppPolicy {
    /// Policy that opens nothing in either direction.
    #[must_use]
    pub const fn deny_all(subject: Subject) -> Self {
        Self {
            subject,
            allowed_paths: BTreeSet::new(),
            upload_allowed: false,
            download_allowed: false,
        }
    }

    /// Policy that opens every path in both directions.
    #[must_use]
    pub fn allow_all(subject: Subject) -> Self {
        Self {
            subject,
            allowed_paths: NetworkPathCapability::ALL.into_iter().collect(),
            upload_allowed: true,
            download_allowed: true,
        }
    }

    /// Policy opening the given paths with both directions allowed.
    #[must_use]
    pub fn with_paths(
        subject: Subject,
        paths: impl IntoIterator<Item = NetworkPathCapability>,
    ) -> Self {
        Self {
            subject,
            allowed_paths: paths.into_iter().collect(),
            upload_allowed: true,
            download_allowed: true,
        }
    }

    #[must_use]
    pub fn upload(mut self, allowed: bool) -> Self {
        self.upload_allowed = allowed;
        self
    }

    #[must_use]
    pub fn download(mut self, allowed: bool) -> Self {
        self.download_allowed = allowed;
        self
    }

    #[must_use]
    pub fn allows(&self, capability: NetworkPathCapability) -> bool {
        self.allowed_paths.contains(&capability)
    }

    /// Returns true if no chain is needed for this policy.
    ///
    /// Roaming rides the mobile interfaces, so granting cellular also covers
    /// roaming. Every other capability must be granted explicitly.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.upload_allowed
            && self.download_allowed
            && NetworkPathCapability::ALL.into_iter().all(|cap| {
                self.allows(cap)
                    || (cap == NetworkPathCapability::Roaming
                        && self.allows(NetworkPathCapability::Cellular))
            })
    }

    /// Returns true if the policy lets no traffic out at all.
    #[must_use]
    pub fn denies_all_traffic(&self) -> bool {
        !self.upload_allowed || self.allowed_paths.is_empty()
    }

    /// Canonical signature of every observable field.
    #[must_use]
    pub fn signature(&self) -> PolicySignature {
        let mut out = self.subject.to_string();
        for cap in NetworkPathCapability::ALL {
            out.push(':');
            out.push(flag(self.allows(cap)));
        }
        out.push(':');
        out.push(flag(self.download_allowed));
        out.push(':');
        out.push(flag(self.upload_allowed));
        PolicySignature(out)
    }
}

const fn flag(on: bool) -> char {
    if on { '1' } else { '0' }
}

/// `uid:local:wifi:cellular:roaming:vpn:bluetooth:tor:download:upload` with
/// `1`/`0` flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySignature(String);

impl PolicySignature {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild the policy a signature was computed from.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MalformedSignature`] if the text does not have ten
    /// colon-separated fields with `0`/`1` flags.
    pub fn to_policy(&self) -> Result<AppPolicy, ModelError> {
        let malformed = || ModelError::MalformedSignature(self.0.clone());
        let fields: Vec<&str> = self.0.split(':').collect();
        if fields.len() != NetworkPathCapability::ALL.len() + 3 {
            return Err(malformed());
        }
        let subject: Subject = fields[0].parse().map_err(|_| malformed())?;
        let mut flags = Vec::with_capacity(fields.len() - 1);
        for field in &fields[1..] {
            match *field {
                "1" => flags.push(true),
                "0" => flags.push(false),
                _ => return Err(malformed()),
            }
        }
        let caps = NetworkPathCapability::ALL.len();
        Ok(AppPolicy {
            subject,
            allowed_paths: NetworkPathCapability::ALL
                .into_iter()
                .zip(&flags)
                .filter_map(|(cap, on)| on.then_some(cap))
                .collect(),
            download_allowed: flags[caps],
            upload_allowed: flags[caps + 1],
        })
    }
}

impl From<String> for PolicySignature {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PolicySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

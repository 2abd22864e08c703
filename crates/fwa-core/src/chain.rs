//! Ordered filter specifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PathGroup, PathPattern};

/// One step of a per-subject chain, in backend-neutral form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Directive {
    /// Stop evaluating (accept) when the packet matches the pattern.
    ReturnIfMatches { pattern: PathPattern },
    /// Mark the connection so inbound packets on it are rejected.
    TagForInboundReject,
    /// Reject everything that reached this point.
    RejectAll,
    /// Live rule the compiler never emits. Only produced by backend reads.
    Unrecognized { rule: String },
}

impl Directive {
    #[must_use]
    pub const fn return_if(pattern: PathPattern) -> Self {
        Self::ReturnIfMatches { pattern }
    }

    #[must_use]
    pub const fn pattern(&self) -> Option<&PathPattern> {
        match self {
            Self::ReturnIfMatches { pattern } => Some(pattern),
            _ => None,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReturnIfMatches { pattern } => write!(f, "return {pattern}"),
            Self::TagForInboundReject => f.write_str("tag-inbound-reject"),
            Self::RejectAll => f.write_str("reject"),
            Self::Unrecognized { rule } => write!(f, "unrecognized({rule})"),
        }
    }
}

/// Ordered directive list for one subject. Empty means no chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainSpec(Vec<Directive>);

impl ChainSpec {
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn directives(&self) -> &[Directive] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Directive> {
        self.0.iter()
    }

    /// Returns true if the spec blocks inbound traffic on tagged connections.
    #[must_use]
    pub fn tags_inbound(&self) -> bool {
        self.0.contains(&Directive::TagForInboundReject)
    }

    /// Catalog groups this spec returns on at least once.
    #[must_use]
    pub fn groups(&self) -> Vec<PathGroup> {
        let mut groups: Vec<PathGroup> = self
            .0
            .iter()
            .filter_map(Directive::pattern)
            .filter_map(PathGroup::of_pattern)
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }
}

impl From<Vec<Directive>> for ChainSpec {
    fn from(directives: Vec<Directive>) -> Self {
        Self(directives)
    }
}

impl FromIterator<Directive> for ChainSpec {
    fn from_iter<I: IntoIterator<Item = Directive>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ChainSpec {
    type Item = &'a Directive;
    type IntoIter = std::slice::Iter<'a, Directive>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ChainSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("[]");
        }
        f.write_str("[")?;
        for (i, directive) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{directive}")?;
        }
        f.write_str("]")
    }
}

//! Live state inspector.
//!
//! Read-only view of what the backend currently enforces. Introspection
//! failures are logged and turned into empty results: a run that cannot see
//! the live state simply treats it as absent and converges on the next pass.

use std::collections::BTreeSet;

use fwa_backend::FilterBackend;
use fwa_core::{ChainSpec, Subject};
use tracing::warn;

/// Infallible reads over a [`FilterBackend`].
#[derive(Clone, Copy)]
pub struct LiveStateInspector<'a> {
    backend: &'a dyn FilterBackend,
}

impl<'a> LiveStateInspector<'a> {
    #[must_use]
    pub const fn new(backend: &'a dyn FilterBackend) -> Self {
        Self { backend }
    }

    /// Subjects that currently have an installed chain.
    pub async fn list_managed_subjects(&self) -> BTreeSet<Subject> {
        match self.backend.list_managed_subjects().await {
            Ok(subjects) => subjects,
            Err(error) => {
                warn!(%error, "Introspection failure listing managed subjects");
                BTreeSet::new()
            }
        }
    }

    /// Live chain of the subject; empty when absent or unreadable.
    pub async fn read_chain_spec(&self, subject: Subject) -> ChainSpec {
        match self.backend.read_chain(subject).await {
            Ok(spec) => spec,
            Err(error) => {
                warn!(%subject, %error, "Introspection failure reading chain");
                ChainSpec::empty()
            }
        }
    }
}

//! The filter backend seam.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fwa_core::{ChainSpec, Subject};

use crate::BackendResult;

/// Packet-filter operations the engine needs.
///
/// Every mutating call must be idempotent: the engine re-issues them after
/// partial failures and on every reconciliation pass.
#[async_trait]
pub trait FilterBackend: Send + Sync {
    /// Create the container chains and hook them into OUTPUT and INPUT
    /// exactly once.
    async fn ensure_containers(&self) -> BackendResult<()>;

    /// Replace the subject's chain with `spec` and dispatch the subject to it.
    ///
    /// An empty spec removes the chain.
    async fn install_chain(&self, subject: Subject, spec: &ChainSpec) -> BackendResult<()>;

    /// Detach and delete the subject's chain. Succeeds if none exists.
    async fn remove_chain(&self, subject: Subject) -> BackendResult<()>;

    /// Subjects currently dispatched to a chain.
    async fn list_managed_subjects(&self) -> BackendResult<BTreeSet<Subject>>;

    /// Live directives of the subject's chain; empty if there is none.
    async fn read_chain(&self, subject: Subject) -> BackendResult<ChainSpec>;

    /// Returns true if the output container is hooked, i.e. policy is
    /// currently enforced.
    async fn is_enforcing(&self) -> BackendResult<bool>;

    /// Unhook and delete every chain the agent owns.
    async fn clear_all(&self) -> BackendResult<()>;
}

#[async_trait]
impl<T: FilterBackend + ?Sized> FilterBackend for Arc<T> {
    async fn ensure_containers(&self) -> BackendResult<()> {
        (**self).ensure_containers().await
    }

    async fn install_chain(&self, subject: Subject, spec: &ChainSpec) -> BackendResult<()> {
        (**self).install_chain(subject, spec).await
    }

    async fn remove_chain(&self, subject: Subject) -> BackendResult<()> {
        (**self).remove_chain(subject).await
    }

    async fn list_managed_subjects(&self) -> BackendResult<BTreeSet<Subject>> {
        (**self).list_managed_subjects().await
    }

    async fn read_chain(&self, subject: Subject) -> BackendResult<ChainSpec> {
        (**self).read_chain(subject).await
    }

    async fn is_enforcing(&self) -> BackendResult<bool> {
        (**self).is_enforcing().await
    }

    async fn clear_all(&self) -> BackendResult<()> {
        (**self).clear_all().await
    }
}

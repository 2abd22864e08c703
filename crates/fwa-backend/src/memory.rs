//! In-memory filter backend for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use fwa_core::{ChainSpec, Subject};
use parking_lot::Mutex;

use crate::{BackendError, BackendResult, FilterBackend};

/// Operation recorded by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    EnsureContainers,
    Install(Subject),
    Remove(Subject),
    ClearAll,
}

#[derive(Debug, Default)]
struct MemoryState {
    hooked: bool,
    chains: BTreeMap<Subject, ChainSpec>,
    ops: Vec<BackendOp>,
    fail_setup: bool,
    fail_listing: bool,
    fail_install: BTreeSet<Subject>,
    fail_remove: BTreeSet<Subject>,
    fail_read: BTreeSet<Subject>,
}

/// Backend holding chains in a map, with per-operation failure injection.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with containers hooked and the given chains installed.
    #[must_use]
    pub fn with_chains(chains: impl IntoIterator<Item = (Subject, ChainSpec)>) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock();
            state.hooked = true;
            state.chains.extend(chains);
        }
        backend
    }

    pub fn fail_setup(&self, fail: bool) {
        self.state.lock().fail_setup = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }

    pub fn fail_install(&self, subject: Subject) {
        self.state.lock().fail_install.insert(subject);
    }

    pub fn fail_remove(&self, subject: Subject) {
        self.state.lock().fail_remove.insert(subject);
    }

    pub fn fail_read(&self, subject: Subject) {
        self.state.lock().fail_read.insert(subject);
    }

    /// Clear every injected failure.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_setup = false;
        state.fail_listing = false;
        state.fail_install.clear();
        state.fail_remove.clear();
        state.fail_read.clear();
    }

    /// Overwrite a chain without recording an operation (simulates drift).
    pub fn tamper(&self, subject: Subject, spec: ChainSpec) {
        self.state.lock().chains.insert(subject, spec);
    }

    /// Remove the OUTPUT hook (simulates another tool flushing it).
    pub fn unhook(&self) {
        self.state.lock().hooked = false;
    }

    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.state.lock().hooked
    }

    #[must_use]
    pub fn chain(&self, subject: Subject) -> Option<ChainSpec> {
        self.state.lock().chains.get(&subject).cloned()
    }

    #[must_use]
    pub fn chains(&self) -> BTreeMap<Subject, ChainSpec> {
        self.state.lock().chains.clone()
    }

    #[must_use]
    pub fn ops(&self) -> Vec<BackendOp> {
        self.state.lock().ops.clone()
    }

    /// Recorded per-subject operations, without setup calls.
    #[must_use]
    pub fn subject_ops(&self) -> Vec<BackendOp> {
        self.state
            .lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BackendOp::Install(_) | BackendOp::Remove(_)))
            .cloned()
            .collect()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }
}

fn injected(what: &str, subject: Option<Subject>) -> BackendError {
    match subject {
        Some(subject) => BackendError::Injected(format!("{what} {subject}")),
        None => BackendError::Injected(what.to_string()),
    }
}

#[async_trait]
impl FilterBackend for MemoryBackend {
    async fn ensure_containers(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.ops.push(BackendOp::EnsureContainers);
        if state.fail_setup {
            return Err(injected("setup", None));
        }
        state.hooked = true;
        Ok(())
    }

    async fn install_chain(&self, subject: Subject, spec: &ChainSpec) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.ops.push(BackendOp::Install(subject));
        if state.fail_install.contains(&subject) {
            return Err(injected("install", Some(subject)));
        }
        if spec.is_empty() {
            state.chains.remove(&subject);
        } else {
            state.chains.insert(subject, spec.clone());
        }
        Ok(())
    }

    async fn remove_chain(&self, subject: Subject) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.ops.push(BackendOp::Remove(subject));
        if state.fail_remove.contains(&subject) {
            return Err(injected("remove", Some(subject)));
        }
        state.chains.remove(&subject);
        Ok(())
    }

    async fn list_managed_subjects(&self) -> BackendResult<BTreeSet<Subject>> {
        let state = self.state.lock();
        if state.fail_listing {
            return Err(injected("listing", None));
        }
        Ok(state.chains.keys().copied().collect())
    }

    async fn read_chain(&self, subject: Subject) -> BackendResult<ChainSpec> {
        let state = self.state.lock();
        if state.fail_read.contains(&subject) {
            return Err(injected("read", Some(subject)));
        }
        Ok(state.chains.get(&subject).cloned().unwrap_or_default())
    }

    async fn is_enforcing(&self) -> BackendResult<bool> {
        Ok(self.state.lock().hooked)
    }

    async fn clear_all(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.ops.push(BackendOp::ClearAll);
        state.chains.clear();
        state.hooked = false;
        Ok(())
    }
}

//! Progress recording.

use std::sync::Arc;

use parking_lot::Mutex;

/// Records every `(processed, total)` update handed to its sink.
///
/// Clones share the same record, so one clone can be moved into a run while
/// the test keeps another for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingProgress {
    updates: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl RecordingProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Closure sink feeding this recorder.
    pub fn sink(&self) -> impl FnMut(usize, usize) + Send + 'static {
        let updates = Arc::clone(&self.updates);
        move |processed, total| updates.lock().push((processed, total))
    }

    #[must_use]
    pub fn updates(&self) -> Vec<(usize, usize)> {
        self.updates.lock().clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<(usize, usize)> {
        self.updates.lock().last().copied()
    }
}

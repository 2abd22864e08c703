//! Progress reporting.

use std::time::Duration;

use tokio::time::Instant;

/// Receives `(processed, total)` after every per-subject operation.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, processed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: FnMut(usize, usize) + Send,
{
    fn on_progress(&mut self, processed: usize, total: usize) {
        self(processed, total);
    }
}

/// Sink that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _processed: usize, _total: usize) {}
}

/// Forwards only a thinned-out stream of updates to the wrapped sink.
///
/// An update passes when it is the first or last of a run, when at least
/// `step` items were processed since the last forwarded one, or when
/// `min_interval` has elapsed since then.
#[derive(Debug)]
pub struct CoalescingProgress<S> {
    inner: S,
    step: usize,
    min_interval: Duration,
    last: Option<(usize, Instant)>,
}

impl<S: ProgressSink> CoalescingProgress<S> {
    #[must_use]
    pub const fn new(inner: S, step: usize, min_interval: Duration) -> Self {
        Self {
            inner,
            step,
            min_interval,
            last: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn should_forward(&self, processed: usize, total: usize, now: Instant) -> bool {
        if processed >= total || processed <= 1 {
            return true;
        }
        match self.last {
            None => true,
            Some((last_processed, at)) => {
                processed.saturating_sub(last_processed) >= self.step.max(1)
                    || now.duration_since(at) >= self.min_interval
            }
        }
    }
}

impl<S: ProgressSink> ProgressSink for CoalescingProgress<S> {
    fn on_progress(&mut self, processed: usize, total: usize) {
        let now = Instant::now();
        if self.should_forward(processed, total, now) {
            self.last = Some((processed, now));
            self.inner.on_progress(processed, total);
        }
    }
}

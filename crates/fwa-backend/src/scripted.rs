//! Channel double that records scripts and answers from a queue.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{BackendResult, CommandChannel, ExecOutput};

/// [`CommandChannel`] that records every script it is handed.
///
/// Responses are served in order; once the queue is empty every call
/// succeeds with empty output.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    scripts: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<BackendResult<ExecOutput>>>,
}

impl ScriptedChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response for the next unanswered call.
    pub fn respond(&self, response: BackendResult<ExecOutput>) -> &Self {
        self.responses.lock().push_back(response);
        self
    }

    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    #[must_use]
    pub fn last_script(&self) -> Option<String> {
        self.scripts.lock().last().cloned()
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn execute(&self, script: &str) -> BackendResult<ExecOutput> {
        self.scripts.lock().push(script.to_string());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecOutput::ok("")))
    }
}

//! Privileged command channel.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{BackendConfig, BackendError, BackendResult, RetryConfig};

/// Captured result of one script execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero exit into [`BackendError::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns `CommandFailed` carrying the exit code and trimmed stderr.
    pub fn into_result(self) -> BackendResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BackendError::CommandFailed {
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Executes shell scripts with elevated privileges.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run `script` and capture its output.
    ///
    /// A non-zero exit is not an error at this level; only failing to run the
    /// script at all is.
    async fn execute(&self, script: &str) -> BackendResult<ExecOutput>;
}

/// Runs scripts through `su -c`, or through the plain shell when `su` is not
/// installed (the process is then assumed to already be privileged).
#[derive(Debug)]
pub struct SuShellChannel {
    su: String,
    shell: String,
    timeout: Duration,
    su_missing: AtomicBool,
}

impl SuShellChannel {
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            su: config.su.clone(),
            shell: config.shell.clone(),
            timeout: config.command_timeout(),
            su_missing: AtomicBool::new(false),
        }
    }

    async fn spawn(&self, program: &str, script: &str) -> std::io::Result<std::process::Output> {
        Command::new(program)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
    }

    async fn run(&self, script: &str) -> BackendResult<std::process::Output> {
        if !self.su_missing.load(Ordering::Relaxed) {
            match self.spawn(&self.su, script).await {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(su = %self.su, shell = %self.shell, "su not found, falling back to direct shell");
                    self.su_missing.store(true, Ordering::Relaxed);
                }
                other => return other.map_err(|e| BackendError::Spawn(e.to_string())),
            }
        }
        self.spawn(&self.shell, script)
            .await
            .map_err(|e| BackendError::Spawn(e.to_string()))
    }
}

#[async_trait]
impl CommandChannel for SuShellChannel {
    async fn execute(&self, script: &str) -> BackendResult<ExecOutput> {
        debug!(script, "Executing privileged script");
        let output = tokio::time::timeout(self.timeout, self.run(script))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        Ok(ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Wraps a channel and retries transient failures with exponential backoff.
#[derive(Debug)]
pub struct RetryingChannel<C> {
    inner: C,
    retry: RetryConfig,
}

impl<C: CommandChannel> RetryingChannel<C> {
    #[must_use]
    pub const fn new(inner: C, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    #[must_use]
    pub const fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CommandChannel> CommandChannel for RetryingChannel<C> {
    async fn execute(&self, script: &str) -> BackendResult<ExecOutput> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.inner.execute(script).await {
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient channel failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

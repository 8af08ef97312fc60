//! Caller-facing working instances
//!
//! A [`WorkingInstance`] is the caller's exclusive clone of a base; a
//! [`LaunchedEnvironment`] scopes it to a session and guarantees teardown
//! per the caller's shutdown policy. Teardown is best-effort: failures are
//! logged, never surfaced on the caller's exit path.

use crate::backend::{ExecOutput, Executor};
use crate::error::{KilnError, KilnResult};
use crate::session::{SessionManager, SessionStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What happens to the working instance when the session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Destroy the instance immediately on shutdown
    Destroy,
    /// Keep the instance running and destroy it after the delay
    /// (reaped by `kiln clean`)
    Defer(Duration),
    /// Leave the instance running indefinitely
    Keep,
}

/// A caller-owned clone of a completed base instance
#[derive(Clone)]
pub struct WorkingInstance {
    name: String,
    base_key: String,
    executor: Arc<dyn Executor>,
    execute_timeout: Duration,
}

impl WorkingInstance {
    pub(crate) fn new(
        name: String,
        base_key: String,
        executor: Arc<dyn Executor>,
        execute_timeout: Duration,
    ) -> Self {
        Self {
            name,
            base_key,
            executor,
            execute_timeout,
        }
    }

    /// Instance name (also the backend instance name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key of the base this instance was cloned from
    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// Execute a command inside the instance
    pub async fn execute(&self, command: &[String], capture_output: bool) -> KilnResult<ExecOutput> {
        self.executor
            .execute(&self.name, command, capture_output, self.execute_timeout)
            .await
    }

    /// Push a host file into the instance
    pub async fn push_file(&self, local: &Path, remote: &str) -> KilnResult<()> {
        self.executor.push_file(&self.name, local, remote).await
    }

    /// Pull a file from the instance to the host
    pub async fn pull_file(&self, remote: &str, local: &Path) -> KilnResult<()> {
        self.executor.pull_file(&self.name, remote, local).await
    }

    /// Mount a host directory into the instance
    pub async fn mount(&self, host_source: &Path, target: &str) -> KilnResult<()> {
        self.executor.mount(&self.name, host_source, target).await
    }

    /// Whether the instance is running
    pub async fn is_running(&self) -> KilnResult<bool> {
        self.executor.is_running(&self.name).await
    }

    /// Destroy the instance
    pub async fn destroy(&self) -> KilnResult<()> {
        self.executor.destroy(&self.name).await
    }
}

impl std::fmt::Debug for WorkingInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingInstance")
            .field("name", &self.name)
            .field("base_key", &self.base_key)
            .finish_non_exhaustive()
    }
}

/// A working instance scoped to a session record.
///
/// Call [`shutdown`](Self::shutdown) on every exit path; the drop guard
/// only logs, since teardown needs async backend calls.
pub struct LaunchedEnvironment {
    instance: WorkingInstance,
    sessions: SessionManager,
    policy: ShutdownPolicy,
    closed: bool,
}

impl LaunchedEnvironment {
    pub(crate) fn new(
        instance: WorkingInstance,
        sessions: SessionManager,
        policy: ShutdownPolicy,
    ) -> Self {
        Self {
            instance,
            sessions,
            policy,
            closed: false,
        }
    }

    /// The working instance
    pub fn instance(&self) -> &WorkingInstance {
        &self.instance
    }

    /// The shutdown policy this environment was launched with
    pub fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    /// End the session, applying the shutdown policy.
    ///
    /// Never fails: teardown errors are logged and swallowed so they do
    /// not mask the caller's own result.
    pub async fn shutdown(mut self) {
        self.closed = true;
        let name = self.instance.name().to_string();

        match self.policy {
            ShutdownPolicy::Destroy => {
                if let Err(e) = self.instance.destroy().await {
                    warn!("Failed to destroy instance {}: {}", name, e);
                    self.mark(SessionStatus::Failed).await;
                    return;
                }
                self.mark(SessionStatus::Stopped).await;
                info!("Destroyed instance {}", name);
            }
            ShutdownPolicy::Defer(delay) => {
                if let Err(e) = self.sessions.defer_teardown(&name, delay).await {
                    warn!("Failed to defer teardown of {}: {}", name, e);
                }
                info!(
                    "Instance {} left running; destruction deferred by {}s",
                    name,
                    delay.as_secs()
                );
            }
            ShutdownPolicy::Keep => {
                info!("Instance {} left running", name);
            }
        }
    }

    async fn mark(&self, status: SessionStatus) {
        if let Err(e) = self.sessions.update_status(self.instance.name(), status).await {
            // Record may already be gone; only worth a log line.
            if !matches!(e, KilnError::SessionNotFound(_)) {
                warn!("Failed to update session {}: {}", self.instance.name(), e);
            }
        }
    }
}

impl Drop for LaunchedEnvironment {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Environment {} dropped without shutdown; instance may still be running (kiln clean will not reap it unless deferred)",
                self.instance.name()
            );
        }
    }
}

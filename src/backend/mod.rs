//! Backend abstraction for instance lifecycles
//!
//! Provides a trait for instance operations implemented by different
//! virtualization backends (LXD containers, Multipass VMs). The
//! provisioning engine is written against the trait only; adapters
//! translate each call into backend CLI invocations.

mod lxd;
mod multipass;

pub use lxd::LxdExecutor;
pub use multipass::MultipassExecutor;

use crate::base::BaseSpecification;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Captured output of a command run inside an instance
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured stdout (empty when not captured)
    pub stdout: String,
    /// Captured stderr (empty when not captured)
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Abstract instance executor interface
///
/// Implementations drive one backend's CLI. All methods that talk to the
/// backend daemon may fail with `BackendCommunication`; callers wrap them
/// in the retry policy.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Check if the backend is installed on this system
    async fn is_available(&self) -> KilnResult<bool>;

    /// Ensure the backend is ready to serve (daemon up, version supported)
    async fn ensure_ready(&self) -> KilnResult<()>;

    /// Create and start a new instance from the spec's image
    async fn create(&self, spec: &BaseSpecification, name: &str) -> KilnResult<()>;

    /// Destroy an instance, stopping it first if needed
    async fn destroy(&self, name: &str) -> KilnResult<()>;

    /// Clone an existing instance into a new one and start it
    async fn clone_instance(&self, source: &str, dest: &str) -> KilnResult<()>;

    /// Execute a command inside an instance
    async fn execute(
        &self,
        name: &str,
        command: &[String],
        capture_output: bool,
        timeout: Duration,
    ) -> KilnResult<ExecOutput>;

    /// Push a host file into an instance
    async fn push_file(&self, name: &str, local: &Path, remote: &str) -> KilnResult<()>;

    /// Pull a file from an instance to the host
    async fn pull_file(&self, name: &str, remote: &str, local: &Path) -> KilnResult<()>;

    /// Whether the named instance exists and is running
    async fn is_running(&self, name: &str) -> KilnResult<bool>;

    /// Whether the named instance exists at all
    async fn exists(&self, name: &str) -> KilnResult<bool>;

    /// Mount a host directory into an instance
    async fn mount(&self, name: &str, host_source: &Path, target: &str) -> KilnResult<()>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Create the executor selected by configuration
pub fn create_executor(config: &Config) -> KilnResult<Arc<dyn Executor>> {
    match config.backend.kind.as_str() {
        "lxd" => Ok(Arc::new(LxdExecutor::new(config.backend.lxd_project.clone()))),
        "multipass" => Ok(Arc::new(MultipassExecutor::new())),
        other => Err(KilnError::UnsupportedBackend(other.to_string())),
    }
}

/// Classify a backend CLI failure from its stderr.
///
/// Connectivity and daemon trouble is retryable; permission and
/// authorization failures are fatal and must not consume retries.
pub(crate) fn classify_stderr(operation: &str, stderr: &str) -> KilnError {
    let lower = stderr.to_lowercase();

    if lower.contains("permission denied")
        || lower.contains("not authorized")
        || lower.contains("forbidden")
    {
        return KilnError::PermissionDenied {
            operation: operation.to_string(),
            reason: stderr.trim().to_string(),
        };
    }

    KilnError::backend(operation, stderr.trim())
}

/// Parse the first semver-looking token out of a version line.
///
/// Backend CLIs print versions with prefixes and suffixes
/// (`Client version: 5.21.1 LTS`, `multipass   1.15.0`).
pub(crate) fn parse_version(output: &str) -> Option<semver::Version> {
    for token in output.split_whitespace() {
        let trimmed = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');
        // Pad "5.21" style versions to full semver.
        let candidate = match trimmed.matches('.').count() {
            1 => format!("{trimmed}.0"),
            _ => trimmed.to_string(),
        };
        if let Ok(version) = semver::Version::parse(&candidate) {
            return Some(version);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_output_success() {
        let out = ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(out.success());
    }

    #[test]
    fn classify_permission() {
        let err = classify_stderr("create", "Error: not authorized");
        assert!(matches!(err, KilnError::PermissionDenied { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn classify_transient() {
        let err = classify_stderr("exec", "Error: connection reset by peer");
        assert!(matches!(err, KilnError::BackendCommunication { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn parse_version_forms() {
        assert_eq!(
            parse_version("Client version: 5.21.1\nServer version: 5.21.1"),
            Some(semver::Version::new(5, 21, 1))
        );
        assert_eq!(
            parse_version("multipass   1.15.0"),
            Some(semver::Version::new(1, 15, 0))
        );
        assert_eq!(
            parse_version("5.21 LTS"),
            Some(semver::Version::new(5, 21, 0))
        );
        assert_eq!(parse_version("no digits here"), None);
    }

    #[test]
    fn factory_rejects_unknown_backend() {
        let mut config = Config::default();
        config.backend.kind = "qemu".to_string();
        assert!(matches!(
            create_executor(&config),
            Err(KilnError::UnsupportedBackend(_))
        ));
    }
}

//! Multipass executor
//!
//! Implements the Executor trait by driving the `multipass` CLI. Instances
//! are full VMs, so creates and clones are slower than LXD; the retry
//! policy's generous per-attempt timeouts matter here.

use crate::backend::{classify_stderr, parse_version, ExecOutput, Executor};
use crate::base::BaseSpecification;
use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// First release with `multipass clone`
const MINIMUM_VERSION: semver::Version = semver::Version::new(1, 15, 0);

/// Executor backed by Multipass virtual machines
pub struct MultipassExecutor;

/// Subset of `multipass info --format json` output
#[derive(Debug, Deserialize)]
struct MultipassInfo {
    info: HashMap<String, MultipassInstanceInfo>,
}

#[derive(Debug, Deserialize)]
struct MultipassInstanceInfo {
    state: String,
}

impl MultipassExecutor {
    /// Create a Multipass executor
    pub fn new() -> Self {
        Self
    }

    /// Execute a multipass command and return the raw output
    async fn multipass(&self, args: &[&str]) -> KilnResult<std::process::Output> {
        debug!("Executing: multipass {:?}", args);

        Command::new("multipass")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KilnError::command_failed(format!("multipass {args:?}"), e))
    }

    /// Run a multipass command, mapping non-zero exit into a classified error
    async fn multipass_checked(&self, operation: &str, args: &[&str]) -> KilnResult<String> {
        let output = self.multipass(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_stderr(operation, &stderr))
        }
    }

    async fn instance_state(&self, name: &str) -> KilnResult<Option<String>> {
        let output = self
            .multipass(&["info", name, "--format", "json"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("does not exist") {
                return Ok(None);
            }
            return Err(classify_stderr("info", &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: MultipassInfo = serde_json::from_str(&stdout).map_err(|e| {
            KilnError::backend("info", format!("unparseable multipass info output: {e}"))
        })?;
        Ok(parsed.info.get(name).map(|i| i.state.clone()))
    }
}

impl Default for MultipassExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MultipassExecutor {
    async fn is_available(&self) -> KilnResult<bool> {
        let status = Command::new("multipass")
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    async fn ensure_ready(&self) -> KilnResult<()> {
        if !self.is_available().await? {
            return Err(KilnError::BackendNotFound {
                name: "multipass".to_string(),
                hint: "Install with: snap install multipass".to_string(),
            });
        }

        let stdout = self
            .multipass_checked("version", &["version"])
            .await
            .map_err(|_| KilnError::BackendNotReady {
                name: "multipass".to_string(),
                reason: "daemon did not answer `multipass version`".to_string(),
            })?;

        match parse_version(&stdout) {
            Some(version) if version >= MINIMUM_VERSION => Ok(()),
            Some(version) => Err(KilnError::BackendTooOld {
                name: "multipass".to_string(),
                found: version.to_string(),
                minimum: MINIMUM_VERSION.to_string(),
            }),
            None => Err(KilnError::BackendNotReady {
                name: "multipass".to_string(),
                reason: format!("unrecognized version output: {}", stdout.trim()),
            }),
        }
    }

    async fn create(&self, spec: &BaseSpecification, name: &str) -> KilnResult<()> {
        info!(
            "Launching Multipass instance {} from {}",
            name,
            spec.release()
        );
        // Multipass images are addressed by release alone; the family is
        // always Ubuntu there. Reject mismatches early instead of letting
        // the CLI fail with an opaque image error.
        if spec.family() != crate::base::DistroFamily::Ubuntu {
            return Err(KilnError::InvalidSpec(format!(
                "multipass only provides ubuntu images, not {}",
                spec.family()
            )));
        }
        self.multipass_checked("create", &["launch", spec.release(), "--name", name])
            .await?;
        Ok(())
    }

    async fn destroy(&self, name: &str) -> KilnResult<()> {
        debug!("Deleting Multipass instance {}", name);
        match self
            .multipass_checked("destroy", &["delete", "--purge", name])
            .await
        {
            Ok(_) => Ok(()),
            Err(KilnError::BackendCommunication { reason, .. })
                if reason.to_lowercase().contains("does not exist") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn clone_instance(&self, source: &str, dest: &str) -> KilnResult<()> {
        info!("Cloning Multipass instance {} -> {}", source, dest);
        // Clone requires the source to be stopped.
        self.multipass_checked("clone", &["stop", source]).await?;
        self.multipass_checked("clone", &["clone", source, "--name", dest])
            .await?;
        self.multipass_checked("clone", &["start", dest]).await?;
        Ok(())
    }

    async fn execute(
        &self,
        name: &str,
        command: &[String],
        capture_output: bool,
        timeout: Duration,
    ) -> KilnResult<ExecOutput> {
        let mut args: Vec<String> = vec!["exec".to_string(), name.to_string(), "--".to_string()];
        args.extend(command.iter().cloned());
        debug!("Executing in {}: {:?}", name, command);

        let mut cmd = Command::new("multipass");
        cmd.args(&args).stdin(Stdio::null());
        if capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                KilnError::backend(
                    "execute",
                    format!("command in {name} exceeded {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| KilnError::command_failed(format!("multipass exec {name}"), e))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn push_file(&self, name: &str, local: &Path, remote: &str) -> KilnResult<()> {
        let local_str = local.display().to_string();
        let target = format!("{name}:{remote}");
        debug!("Transferring {} -> {}", local_str, target);
        self.multipass_checked("push-file", &["transfer", &local_str, &target])
            .await?;
        Ok(())
    }

    async fn pull_file(&self, name: &str, remote: &str, local: &Path) -> KilnResult<()> {
        let source = format!("{name}:{remote}");
        let local_str = local.display().to_string();
        debug!("Transferring {} -> {}", source, local_str);
        self.multipass_checked("pull-file", &["transfer", &source, &local_str])
            .await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> KilnResult<bool> {
        Ok(self
            .instance_state(name)
            .await?
            .is_some_and(|state| state.eq_ignore_ascii_case("running")))
    }

    async fn exists(&self, name: &str) -> KilnResult<bool> {
        Ok(self.instance_state(name).await?.is_some())
    }

    async fn mount(&self, name: &str, host_source: &Path, target: &str) -> KilnResult<()> {
        let source = host_source.display().to_string();
        let dest = format!("{name}:{target}");
        debug!("Mounting {} at {}", source, dest);
        self.multipass_checked("mount", &["mount", &source, &dest])
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Multipass"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::DistroFamily;

    #[test]
    fn backend_name() {
        assert_eq!(MultipassExecutor::new().backend_name(), "Multipass");
    }

    #[test]
    fn parses_info_output() {
        let json = r#"{"errors": [], "info": {"build-1": {"state": "Running"}}}"#;
        let parsed: MultipassInfo = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.info["build-1"].state, "Running");
    }

    #[tokio::test]
    async fn rejects_non_ubuntu_spec() {
        let spec =
            BaseSpecification::with_default_steps(DistroFamily::Fedora, "41", vec![]).unwrap();
        let result = MultipassExecutor::new().create(&spec, "x").await;
        assert!(matches!(result, Err(KilnError::InvalidSpec(_))));
    }
}

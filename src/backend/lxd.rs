//! LXD executor
//!
//! Implements the Executor trait by driving the `lxc` CLI. Instances are
//! system containers; cloning a stopped or running container is cheap
//! (copy-on-write on btrfs/zfs pools), which is what makes base instance
//! caching pay off.

use crate::backend::{classify_stderr, parse_version, ExecOutput, Executor};
use crate::base::BaseSpecification;
use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Oldest LXD the adapter is tested against
const MINIMUM_VERSION: semver::Version = semver::Version::new(5, 0, 0);

/// Executor backed by LXD system containers
pub struct LxdExecutor {
    project: Option<String>,
}

/// Subset of `lxc list --format json` output
#[derive(Debug, Deserialize)]
struct LxcInstance {
    name: String,
    status: String,
}

impl LxdExecutor {
    /// Create an LXD executor, optionally scoped to an LXD project
    pub fn new(project: Option<String>) -> Self {
        Self { project }
    }

    fn base_args(&self) -> Vec<String> {
        match &self.project {
            Some(project) => vec!["--project".to_string(), project.clone()],
            None => vec![],
        }
    }

    /// Execute an lxc command and return the raw output
    async fn lxc(&self, args: &[&str]) -> KilnResult<std::process::Output> {
        let mut full: Vec<String> = self.base_args();
        full.extend(args.iter().map(ToString::to_string));
        debug!("Executing: lxc {:?}", full);

        Command::new("lxc")
            .args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KilnError::command_failed(format!("lxc {full:?}"), e))
    }

    /// Run an lxc command, mapping a non-zero exit into a classified error
    async fn lxc_checked(&self, operation: &str, args: &[&str]) -> KilnResult<String> {
        let output = self.lxc(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_stderr(operation, &stderr))
        }
    }

    async fn list_instances(&self, name: &str) -> KilnResult<Vec<LxcInstance>> {
        let stdout = self
            .lxc_checked("list", &["list", name, "--format", "json"])
            .await?;
        serde_json::from_str(&stdout)
            .map_err(|e| KilnError::backend("list", format!("unparseable lxc list output: {e}")))
    }
}

#[async_trait]
impl Executor for LxdExecutor {
    async fn is_available(&self) -> KilnResult<bool> {
        let status = Command::new("lxc")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    async fn ensure_ready(&self) -> KilnResult<()> {
        if !self.is_available().await? {
            return Err(KilnError::BackendNotFound {
                name: "lxc".to_string(),
                hint: "Install with: snap install lxd".to_string(),
            });
        }

        let stdout = self.lxc_checked("version", &["version"]).await.map_err(|_| {
            KilnError::BackendNotReady {
                name: "lxd".to_string(),
                reason: "daemon did not answer `lxc version`".to_string(),
            }
        })?;

        match parse_version(&stdout) {
            Some(version) if version >= MINIMUM_VERSION => Ok(()),
            Some(version) => Err(KilnError::BackendTooOld {
                name: "lxd".to_string(),
                found: version.to_string(),
                minimum: MINIMUM_VERSION.to_string(),
            }),
            None => Err(KilnError::BackendNotReady {
                name: "lxd".to_string(),
                reason: format!("unrecognized version output: {}", stdout.trim()),
            }),
        }
    }

    async fn create(&self, spec: &BaseSpecification, name: &str) -> KilnResult<()> {
        info!("Launching LXD instance {} from {}", name, spec.image());
        let image = spec.image();
        self.lxc_checked("create", &["launch", &image, name])
            .await?;
        Ok(())
    }

    async fn destroy(&self, name: &str) -> KilnResult<()> {
        debug!("Deleting LXD instance {}", name);
        match self.lxc_checked("destroy", &["delete", "--force", name]).await {
            Ok(_) => Ok(()),
            // Already gone is success for destroy.
            Err(KilnError::BackendCommunication { reason, .. })
                if reason.to_lowercase().contains("not found") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn clone_instance(&self, source: &str, dest: &str) -> KilnResult<()> {
        info!("Cloning LXD instance {} -> {}", source, dest);
        self.lxc_checked("clone", &["copy", source, dest]).await?;
        self.lxc_checked("clone", &["start", dest]).await?;
        Ok(())
    }

    async fn execute(
        &self,
        name: &str,
        command: &[String],
        capture_output: bool,
        timeout: Duration,
    ) -> KilnResult<ExecOutput> {
        let mut args: Vec<String> = self.base_args();
        args.push("exec".to_string());
        args.push(name.to_string());
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        debug!("Executing in {}: {:?}", name, command);

        let mut cmd = Command::new("lxc");
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
            .map_err(|e| KilnError::command_failed(format!("lxc exec {name}"), e))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn push_file(&self, name: &str, local: &Path, remote: &str) -> KilnResult<()> {
        let local_str = local.display().to_string();
        let target = format!("{name}{remote}");
        debug!("Pushing {} -> {}", local_str, target);
        self.lxc_checked("push-file", &["file", "push", &local_str, &target])
            .await?;
        Ok(())
    }

    async fn pull_file(&self, name: &str, remote: &str, local: &Path) -> KilnResult<()> {
        let source = format!("{name}{remote}");
        let local_str = local.display().to_string();
        debug!("Pulling {} -> {}", source, local_str);
        self.lxc_checked("pull-file", &["file", "pull", &source, &local_str])
            .await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> KilnResult<bool> {
        let instances = self.list_instances(name).await?;
        Ok(instances
            .iter()
            .any(|i| i.name == name && i.status.eq_ignore_ascii_case("running")))
    }

    async fn exists(&self, name: &str) -> KilnResult<bool> {
        let instances = self.list_instances(name).await?;
        Ok(instances.iter().any(|i| i.name == name))
    }

    async fn mount(&self, name: &str, host_source: &Path, target: &str) -> KilnResult<()> {
        // Device name must be unique per target; derive it from the path.
        let device = format!(
            "kiln-{}",
            target.trim_matches('/').replace('/', "-")
        );
        let source = format!("source={}", host_source.display());
        let path = format!("path={target}");
        debug!("Mounting {} at {} in {}", host_source.display(), target, name);
        self.lxc_checked(
            "mount",
            &["config", "device", "add", name, &device, "disk", &source, &path],
        )
        .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "LXD"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_name() {
        let executor = LxdExecutor::new(None);
        assert_eq!(executor.backend_name(), "LXD");
    }

    #[test]
    fn project_scoping() {
        let executor = LxdExecutor::new(Some("kiln".to_string()));
        assert_eq!(executor.base_args(), vec!["--project", "kiln"]);

        let executor = LxdExecutor::new(None);
        assert!(executor.base_args().is_empty());
    }

    #[test]
    fn parses_list_output() {
        let json = r#"[{"name": "kiln-base-x", "status": "Running"}]"#;
        let instances: Vec<LxcInstance> = serde_json::from_str(json).unwrap();
        assert_eq!(instances[0].name, "kiln-base-x");
        assert_eq!(instances[0].status, "Running");
    }
}

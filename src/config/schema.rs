//! Configuration schema for Kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`, optionally
//! overlaid by a project-local `.kiln.toml`. Expiry windows, retry counts,
//! and timeouts are tuning constants, so they live here rather than in
//! code.

use crate::base::{BaseSpecification, DistroFamily, SetupStep};
use crate::error::KilnResult;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Backend selection
    pub backend: BackendConfig,

    /// Base environment defaults
    pub base: BaseConfig,

    /// Provisioning policy knobs
    pub provision: ProvisionConfig,

    /// Working-instance session settings
    pub session: SessionConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend kind: "lxd" or "multipass"
    pub kind: String,

    /// LXD project to scope instances to (LXD only)
    pub lxd_project: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "lxd".to_string(),
            lxd_project: None,
        }
    }
}

/// Base environment defaults, overridable per project via `.kiln.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    /// Distribution family: "ubuntu", "debian", "fedora"
    pub family: String,

    /// Release name, e.g. "24.04"
    pub release: String,

    /// Packages installed during base setup
    pub packages: Vec<String>,

    /// Extra commands run after package installation, in order
    pub setup: Vec<Vec<String>>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            family: "ubuntu".to_string(),
            release: "24.04".to_string(),
            packages: vec![
                "build-essential".to_string(),
                "git".to_string(),
                "curl".to_string(),
            ],
            setup: vec![],
        }
    }
}

impl BaseConfig {
    /// Build the immutable specification this config describes
    pub fn to_specification(&self) -> KilnResult<BaseSpecification> {
        let family = DistroFamily::parse(&self.family)?;
        let mut spec = BaseSpecification::with_default_steps(
            family,
            self.release.clone(),
            self.packages.clone(),
        )?;
        if !self.setup.is_empty() {
            let mut steps = spec.steps().to_vec();
            for command in &self.setup {
                steps.push(SetupStep::RunCommand {
                    command: command.clone(),
                });
            }
            spec = BaseSpecification::new(family, self.release.clone(), steps)?;
        }
        Ok(spec)
    }
}

/// Provisioning policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Reprovision bases unrefreshed for this many days
    pub expiry_days: u32,

    /// How long to wait on another process's provisioning lock
    pub lock_timeout_secs: u64,

    /// Attempts per setup step or backend call
    pub setup_attempts: u32,

    /// Upper bound on a single backend call attempt
    pub attempt_timeout_secs: u64,

    /// Upper bound on one retried operation, attempts and backoff included
    pub operation_deadline_secs: u64,

    /// Optional cap on a whole ensure-working-instance run (0 = none)
    pub overall_deadline_secs: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            expiry_days: 90,
            lock_timeout_secs: 120,
            setup_attempts: 3,
            attempt_timeout_secs: 120,
            operation_deadline_secs: 600,
            overall_deadline_secs: 0,
        }
    }
}

impl ProvisionConfig {
    /// Retry policy for backend calls under this config
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.setup_attempts,
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            overall_deadline: Duration::from_secs(self.operation_deadline_secs),
            ..RetryPolicy::default()
        }
    }

    /// Lock acquisition timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Overall deadline for one provisioning run, if configured
    pub fn overall_deadline(&self) -> Option<Duration> {
        if self.overall_deadline_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.overall_deadline_secs))
        }
    }
}

/// Working-instance session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Command timeout for `kiln exec` and launch commands, in seconds
    pub execute_timeout_secs: u64,

    /// Clean up stopped session records older than N hours (0 = disabled)
    pub auto_cleanup_hours: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            execute_timeout_secs: 3600,
            auto_cleanup_hours: 24,
        }
    }
}

impl SessionConfig {
    /// Execution timeout as a duration
    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[backend]"));
        assert!(toml.contains("[provision]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.backend.kind, "lxd");
        assert_eq!(config.provision.expiry_days, 90);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [backend]
            kind = "multipass"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.kind, "multipass");
        assert_eq!(config.base.release, "24.04"); // default preserved
    }

    #[test]
    fn base_config_builds_specification() {
        let config = BaseConfig::default();
        let spec = config.to_specification().unwrap();
        assert_eq!(spec.release(), "24.04");
        assert_eq!(spec.steps().len(), 3);
    }

    #[test]
    fn base_config_appends_setup_commands() {
        let mut config = BaseConfig::default();
        config.setup = vec![vec!["systemctl".to_string(), "enable".to_string(), "ssh".to_string()]];
        let spec = config.to_specification().unwrap();
        assert_eq!(spec.steps().len(), 4);
        assert!(spec.steps().last().unwrap().id().starts_with("run-command:"));
    }

    #[test]
    fn base_config_rejects_bad_family() {
        let mut config = BaseConfig::default();
        config.family = "plan9".to_string();
        assert!(config.to_specification().is_err());
    }

    #[test]
    fn provision_policy_from_config() {
        let config = ProvisionConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(120));
        assert!(config.overall_deadline().is_none());
    }
}

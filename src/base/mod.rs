//! Base environment specifications
//!
//! A [`BaseSpecification`] identifies a template build environment: the
//! distribution family, the release, and the ordered setup steps applied on
//! top of a stock image. Specifications are immutable and hash to a cache
//! key used to find a reusable base instance.

pub mod cache;
pub mod record;
pub mod tag;

pub use cache::{BaseInstanceCache, ReuseDecision};
pub use record::BaseInstanceRecord;
pub use tag::CompatibilityTag;

use crate::error::{KilnError, KilnResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Supported distribution families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    /// Ubuntu (apt)
    Ubuntu,
    /// Debian (apt)
    Debian,
    /// Fedora (dnf)
    Fedora,
}

impl DistroFamily {
    /// Parse from a config value
    pub fn parse(s: &str) -> KilnResult<Self> {
        match s {
            "ubuntu" => Ok(Self::Ubuntu),
            "debian" => Ok(Self::Debian),
            "fedora" => Ok(Self::Fedora),
            other => Err(KilnError::InvalidSpec(format!(
                "unknown distribution family '{other}'"
            ))),
        }
    }

    /// Command that refreshes the package index
    fn refresh_command(&self) -> Vec<String> {
        match self {
            Self::Ubuntu | Self::Debian => {
                vec!["apt-get".into(), "update".into()]
            }
            Self::Fedora => vec!["dnf".into(), "makecache".into()],
        }
    }

    /// Command that installs packages
    fn install_command(&self, packages: &[String]) -> Vec<String> {
        let mut cmd: Vec<String> = match self {
            Self::Ubuntu | Self::Debian => {
                vec!["apt-get".into(), "install".into(), "-y".into()]
            }
            Self::Fedora => vec!["dnf".into(), "install".into(), "-y".into()],
        };
        cmd.extend(packages.iter().cloned());
        cmd
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::Fedora => "fedora",
        };
        write!(f, "{name}")
    }
}

/// One provisioning action applied during base setup.
///
/// Steps run strictly in declared order, each depending on the prior one
/// succeeding. Steps are written to be idempotent so an abandoned base can
/// be rebuilt from scratch without side effects on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetupStep {
    /// Wait until the instance has outbound networking
    WaitForNetwork,
    /// Refresh the package index
    UpdatePackages,
    /// Install a set of packages
    InstallPackages { packages: Vec<String> },
    /// Write a file inside the instance
    WriteFile {
        path: String,
        content: String,
        mode: String,
    },
    /// Run an arbitrary command
    RunCommand { command: Vec<String> },
}

impl SetupStep {
    /// Stable identifier used in diagnostics when a step fails
    pub fn id(&self) -> String {
        match self {
            Self::WaitForNetwork => "wait-for-network".to_string(),
            Self::UpdatePackages => "update-packages".to_string(),
            Self::InstallPackages { packages } => {
                format!("install-packages:{}", packages.join(","))
            }
            Self::WriteFile { path, .. } => format!("write-file:{path}"),
            Self::RunCommand { command } => {
                format!("run-command:{}", command.first().map_or("", String::as_str))
            }
        }
    }

    /// The command this step executes inside the instance, if any.
    ///
    /// `WriteFile` has no command; the engine pushes the file instead.
    pub fn command(&self, family: DistroFamily) -> Option<Vec<String>> {
        match self {
            Self::WaitForNetwork => Some(vec![
                "getent".into(),
                "hosts".into(),
                "archive.ubuntu.com".into(),
            ]),
            Self::UpdatePackages => Some(family.refresh_command()),
            Self::InstallPackages { packages } => Some(family.install_command(packages)),
            Self::WriteFile { .. } => None,
            Self::RunCommand { command } => Some(command.clone()),
        }
    }
}

/// Identifies a template environment: distribution, release, setup steps.
///
/// Immutable once constructed; the cache key is derived from the canonical
/// serialization, so any change to the steps produces a different base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseSpecification {
    family: DistroFamily,
    release: String,
    steps: Vec<SetupStep>,
}

impl BaseSpecification {
    /// Create a specification with an explicit step list
    pub fn new(family: DistroFamily, release: impl Into<String>, steps: Vec<SetupStep>) -> KilnResult<Self> {
        let release = release.into();
        if release.is_empty() {
            return Err(KilnError::InvalidSpec("empty release".to_string()));
        }
        Ok(Self {
            family,
            release,
            steps,
        })
    }

    /// Create a specification with the standard step sequence for the
    /// family: wait for network, refresh the index, install `packages`.
    pub fn with_default_steps(
        family: DistroFamily,
        release: impl Into<String>,
        packages: Vec<String>,
    ) -> KilnResult<Self> {
        let mut steps = vec![SetupStep::WaitForNetwork, SetupStep::UpdatePackages];
        if !packages.is_empty() {
            steps.push(SetupStep::InstallPackages { packages });
        }
        Self::new(family, release, steps)
    }

    /// Distribution family
    pub fn family(&self) -> DistroFamily {
        self.family
    }

    /// Release name, e.g. "24.04"
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Setup steps in declared order
    pub fn steps(&self) -> &[SetupStep] {
        &self.steps
    }

    /// Backend image reference, e.g. "ubuntu:24.04"
    pub fn image(&self) -> String {
        format!("{}:{}", self.family, self.release)
    }

    /// Content-addressed cache key: first 12 hex chars of the SHA-256 of
    /// the canonical JSON serialization. Same spec = same key.
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }

    /// Name of the base instance for this spec under `tag`
    pub fn base_instance_name(&self, tag: &CompatibilityTag) -> String {
        format!(
            "kiln-base-{}-{}-{}",
            tag,
            self.family,
            self.release.replace('.', "-")
        )
    }
}

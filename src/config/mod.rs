//! Configuration management for Kiln

pub mod schema;

pub use schema::Config;

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local config file discovered upward from the cwd
pub const LOCAL_CONFIG_NAME: &str = ".kiln.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        std::env::var_os("KILN_STATE_DIR").map_or_else(
            || {
                dirs::state_dir()
                    .or_else(dirs::data_local_dir)
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("kiln")
            },
            PathBuf::from,
        )
    }

    /// Directory of base instance records
    pub fn bases_dir() -> PathBuf {
        Self::state_dir().join("bases")
    }

    /// Directory of provisioning lock files
    pub fn locks_dir() -> PathBuf {
        Self::state_dir().join("locks")
    }

    /// Directory of working-instance session records
    pub fn sessions_dir() -> PathBuf {
        Self::state_dir().join("sessions")
    }

    /// Find a project-local config by walking up from `start`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            let candidate = current.join(LOCAL_CONFIG_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = current.parent();
        }
        None
    }

    /// Load configuration, falling back to defaults if no file exists
    pub async fn load(&self) -> KilnResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> KilnResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load global config, then overlay a project-local file if given.
    ///
    /// The local file is a full Config document; any table it sets wins
    /// over the global one, table by table.
    pub async fn load_merged(&self, local: Option<&Path>) -> KilnResult<Config> {
        let mut config = self.load().await?;

        if let Some(path) = local {
            let content = fs::read_to_string(path)
                .await
                .map_err(|e| KilnError::io(format!("reading local config {}", path.display()), e))?;
            let local_value: toml::Value =
                toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;

            let mut merged = toml::Value::try_from(&config)?;
            if let (Some(base), Some(overlay)) = (merged.as_table_mut(), local_value.as_table()) {
                for (key, value) in overlay {
                    base.insert(key.clone(), value.clone());
                }
            }
            config = merged.try_into().map_err(|e: toml::de::Error| {
                KilnError::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;
            debug!("Merged local config from {}", path.display());
        }

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> KilnResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KilnError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> KilnResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure all state directories exist
    pub async fn ensure_state_dirs() -> KilnResult<()> {
        let dirs = [Self::bases_dir(), Self::locks_dir(), Self::sessions_dir()];

        for dir in &dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                KilnError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }

        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.backend.kind, "lxd");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.base.release = "22.04".to_string();

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.base.release, "22.04");
    }

    #[tokio::test]
    async fn local_config_overlays_global() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config.toml");
        let local = temp.path().join(LOCAL_CONFIG_NAME);

        let manager = ConfigManager::with_path(global);
        manager.save(&Config::default()).await.unwrap();

        std::fs::write(
            &local,
            r#"
            [base]
            family = "debian"
            release = "12"
            packages = ["gcc"]
            setup = []
            "#,
        )
        .unwrap();

        let merged = manager.load_merged(Some(&local)).await.unwrap();
        assert_eq!(merged.base.family, "debian");
        assert_eq!(merged.base.release, "12");
        // Untouched tables keep global values.
        assert_eq!(merged.backend.kind, "lxd");
    }

    #[test]
    fn find_local_config_walks_up() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join(LOCAL_CONFIG_NAME), "").unwrap();

        let found = ConfigManager::find_local_config(&nested).unwrap();
        assert_eq!(found, temp.path().join(LOCAL_CONFIG_NAME));
    }
}

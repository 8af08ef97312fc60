//! Per-process provider context
//!
//! Owns the shared state handles: the base record store, the lock
//! namespace, and the session store. Constructed once per process and
//! threaded through the engine explicitly; there are no hidden
//! process-wide singletons.

use crate::base::BaseInstanceCache;
use crate::config::{Config, ConfigManager};
use crate::lock::LockManager;
use crate::session::SessionManager;
use std::path::Path;

/// Shared handles for one kiln process
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Base instance record store
    pub cache: BaseInstanceCache,
    /// Host-scoped lock namespace
    pub locks: LockManager,
    /// Working-instance session store
    pub sessions: SessionManager,
    /// Effective configuration
    pub config: Config,
}

impl ProviderContext {
    /// Build a context over the default state directory
    pub fn new(config: Config) -> Self {
        Self {
            cache: BaseInstanceCache::new(ConfigManager::bases_dir()),
            locks: LockManager::new(ConfigManager::locks_dir()),
            sessions: SessionManager::new(ConfigManager::sessions_dir()),
            config,
        }
    }

    /// Build a context rooted at an explicit state directory (tests)
    pub fn with_state_dir(config: Config, state_dir: &Path) -> Self {
        Self {
            cache: BaseInstanceCache::new(state_dir.join("bases")),
            locks: LockManager::new(state_dir.join("locks")),
            sessions: SessionManager::new(state_dir.join("sessions")),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn context_stores_are_independent() {
        let dir = TempDir::new().unwrap();
        let ctx = ProviderContext::with_state_dir(Config::default(), dir.path());

        assert!(ctx.cache.lookup("none").await.unwrap().is_none());
        assert!(ctx.sessions.get("none").await.unwrap().is_none());
        assert!(ctx.locks.holder("none").unwrap().is_none());
    }
}

//! Session lifecycle management

use crate::error::{KilnError, KilnResult};
use crate::session::state::{Session, SessionStatus};
use chrono::{Duration, Utc};
use std::path::PathBuf;
use tracing::{debug, info};

/// Session manager handles session CRUD and cleanup
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions_dir: PathBuf,
}

impl SessionManager {
    /// Create a session manager over the given directory
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self { sessions_dir }
    }

    /// Create a new session, rejecting name collisions
    pub async fn create(&self, session: &Session) -> KilnResult<()> {
        if Session::load(&self.sessions_dir, &session.name).await?.is_some() {
            return Err(KilnError::SessionExists(session.name.clone()));
        }

        session.save(&self.sessions_dir).await?;
        info!("Created session: {}", session.name);
        Ok(())
    }

    /// Get a session by name
    pub async fn get(&self, name: &str) -> KilnResult<Option<Session>> {
        Session::load(&self.sessions_dir, name).await
    }

    /// List all sessions
    pub async fn list(&self) -> KilnResult<Vec<Session>> {
        Session::list_all(&self.sessions_dir).await
    }

    /// Update session status
    pub async fn update_status(&self, name: &str, status: SessionStatus) -> KilnResult<()> {
        let mut session = self
            .get(name)
            .await?
            .ok_or_else(|| KilnError::SessionNotFound(name.to_string()))?;

        session.status = status;
        session.updated_at = Utc::now();
        session.save(&self.sessions_dir).await?;

        debug!("Updated session {} status to {:?}", name, status);
        Ok(())
    }

    /// Record a deferred-teardown deadline for a session
    pub async fn defer_teardown(&self, name: &str, delay: std::time::Duration) -> KilnResult<()> {
        let mut session = self
            .get(name)
            .await?
            .ok_or_else(|| KilnError::SessionNotFound(name.to_string()))?;

        let delay = Duration::from_std(delay)
            .map_err(|e| KilnError::Internal(format!("shutdown delay out of range: {e}")))?;
        session.destroy_after = Some(Utc::now() + delay);
        session.updated_at = Utc::now();
        session.save(&self.sessions_dir).await?;

        debug!("Deferred teardown of session {} by {}", name, delay);
        Ok(())
    }

    /// Delete a session record
    pub async fn delete(&self, name: &str) -> KilnResult<()> {
        let session = self
            .get(name)
            .await?
            .ok_or_else(|| KilnError::SessionNotFound(name.to_string()))?;

        session.delete(&self.sessions_dir).await?;
        info!("Deleted session: {}", name);
        Ok(())
    }

    /// Sessions whose deferred teardown deadline has passed
    pub async fn due_for_teardown(&self) -> KilnResult<Vec<Session>> {
        let sessions = self.list().await?;
        Ok(sessions.into_iter().filter(Session::teardown_due).collect())
    }

    /// Clean up old stopped/failed session records
    pub async fn cleanup(&self, max_age_hours: u32) -> KilnResult<u32> {
        if max_age_hours == 0 {
            return Ok(0);
        }

        let cutoff = Utc::now() - Duration::hours(i64::from(max_age_hours));
        let sessions = self.list().await?;
        let mut cleaned = 0;

        for session in sessions {
            if !matches!(session.status, SessionStatus::Stopped | SessionStatus::Failed) {
                continue;
            }

            if session.updated_at < cutoff {
                session.delete(&self.sessions_dir).await?;
                cleaned += 1;
                info!("Cleaned up old session: {}", session.name);
            }
        }

        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> SessionManager {
        SessionManager::new(dir.path().join("sessions"))
    }

    fn session(name: &str) -> Session {
        Session::new(name.to_string(), "abc123def456".to_string(), SessionStatus::Ready)
    }

    #[tokio::test]
    async fn create_and_get() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.create(&session("build-1")).await.unwrap();
        let loaded = manager.get("build-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "build-1");
    }

    #[tokio::test]
    async fn create_rejects_duplicate() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.create(&session("build-1")).await.unwrap();
        let result = manager.create(&session("build-1")).await;
        assert!(matches!(result, Err(KilnError::SessionExists(_))));
    }

    #[tokio::test]
    async fn defer_and_collect_due() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.create(&session("build-1")).await.unwrap();
        manager
            .defer_teardown("build-1", std::time::Duration::from_secs(0))
            .await
            .unwrap();

        let due = manager.due_for_teardown().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "build-1");
    }

    #[tokio::test]
    async fn cleanup_removes_old_stopped() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let mut old = session("build-old");
        old.status = SessionStatus::Stopped;
        old.updated_at = Utc::now() - Duration::hours(48);
        old.save(dir.path().join("sessions").as_path()).await.unwrap();

        manager.create(&session("build-new")).await.unwrap();

        let cleaned = manager.cleanup(24).await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(manager.get("build-old").await.unwrap().is_none());
        assert!(manager.get("build-new").await.unwrap().is_some());
    }
}

//! Working-instance session persistence

use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Provisioning,
    Ready,
    Stopped,
    Failed,
}

/// One working instance owned by a caller.
///
/// A session record outlives the kiln process so that deferred teardown
/// (`destroy_after`) and `kiln exec` against a kept instance work across
/// invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: Uuid,

    /// Working instance name (also the backend instance name)
    pub name: String,

    /// Cache key of the base this instance was cloned from
    pub base_key: String,

    /// Current status
    pub status: SessionStatus,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the session was last updated
    pub updated_at: DateTime<Utc>,

    /// Destroy the instance after this time, if set
    pub destroy_after: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new session record
    pub fn new(name: String, base_key: String, status: SessionStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            base_key,
            status,
            created_at: now,
            updated_at: now,
            destroy_after: None,
        }
    }

    /// Whether deferred destruction is due
    pub fn teardown_due(&self) -> bool {
        self.destroy_after.is_some_and(|at| at <= Utc::now())
    }

    fn file_path(sessions_dir: &std::path::Path, name: &str) -> PathBuf {
        sessions_dir.join(format!("{name}.json"))
    }

    /// Load a session from the sessions directory
    pub async fn load(sessions_dir: &std::path::Path, name: &str) -> KilnResult<Option<Self>> {
        let path = Self::file_path(sessions_dir, name);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading session file {}", path.display()), e))?;

        let session: Session = serde_json::from_str(&content)?;
        Ok(Some(session))
    }

    /// Save the session into the sessions directory
    pub async fn save(&self, sessions_dir: &std::path::Path) -> KilnResult<()> {
        let path = Self::file_path(sessions_dir, &self.name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io("creating sessions directory", e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .await
            .map_err(|e| KilnError::io(format!("writing session file {}", path.display()), e))?;

        Ok(())
    }

    /// Delete the session file
    pub async fn delete(&self, sessions_dir: &std::path::Path) -> KilnResult<()> {
        let path = Self::file_path(sessions_dir, &self.name);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| KilnError::io(format!("deleting session file {}", path.display()), e))?;
        }
        Ok(())
    }

    /// List all sessions in the directory, newest first
    pub async fn list_all(sessions_dir: &std::path::Path) -> KilnResult<Vec<Session>> {
        if !sessions_dir.exists() {
            return Ok(vec![]);
        }

        let mut sessions = vec![];
        let mut entries = fs::read_dir(sessions_dir)
            .await
            .map_err(|e| KilnError::io("reading sessions directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io("reading session entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(content) = fs::read_to_string(&path).await {
                    if let Ok(session) = serde_json::from_str::<Session>(&content) {
                        sessions.push(session);
                    }
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_new() {
        let session = Session::new(
            "build-1".to_string(),
            "abc123def456".to_string(),
            SessionStatus::Provisioning,
        );

        assert_eq!(session.name, "build-1");
        assert_eq!(session.status, SessionStatus::Provisioning);
        assert!(session.destroy_after.is_none());
        assert!(!session.teardown_due());
    }

    #[test]
    fn teardown_due_when_past() {
        let mut session = Session::new(
            "build-1".to_string(),
            "abc123def456".to_string(),
            SessionStatus::Ready,
        );
        session.destroy_after = Some(Utc::now() - Duration::minutes(1));
        assert!(session.teardown_due());

        session.destroy_after = Some(Utc::now() + Duration::hours(1));
        assert!(!session.teardown_due());
    }

    #[test]
    fn session_serialize() {
        let session = Session::new(
            "build-1".to_string(),
            "abc123def456".to_string(),
            SessionStatus::Ready,
        );

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("build-1"));
        assert!(json.contains("ready"));

        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, session.name);
        assert_eq!(parsed.base_key, session.base_key);
    }
}

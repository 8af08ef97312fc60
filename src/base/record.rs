//! Persisted base instance metadata
//!
//! One JSON sidecar document per base instance, stored in the kiln state
//! directory so it survives process restarts. Every caller reads the record
//! before deciding reuse; it is deleted when the base is destroyed.

use crate::base::tag::CompatibilityTag;
use crate::lock::is_pid_alive;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for one base instance.
///
/// `setup_complete` starts false at provisioning start and flips to true
/// only after every setup step has succeeded. A false value with a dead
/// owner marks an abandoned build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseInstanceRecord {
    /// Backend instance name
    pub instance_name: String,

    /// Cache key of the specification this base was built from
    pub cache_key: String,

    /// Tag of the setup variant applied to this base
    pub compatibility_tag: CompatibilityTag,

    /// True only once every setup step has succeeded
    pub setup_complete: bool,

    /// When provisioning of this base started
    pub created_at: DateTime<Utc>,

    /// PID of the process that provisioned (or is provisioning) the base
    pub owner_pid: u32,

    /// Unique token for the provisioning run
    pub owner_token: Uuid,
}

impl BaseInstanceRecord {
    /// Create a record for a provisioning run that has just started
    pub fn begin(
        instance_name: impl Into<String>,
        cache_key: impl Into<String>,
        tag: CompatibilityTag,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            cache_key: cache_key.into(),
            compatibility_tag: tag,
            setup_complete: false,
            created_at: Utc::now(),
            owner_pid: std::process::id(),
            owner_token: Uuid::new_v4(),
        }
    }

    /// Whether the provisioning owner is still running
    pub fn owner_alive(&self) -> bool {
        is_pid_alive(self.owner_pid)
    }

    /// An in-progress record whose owner died mid-setup
    pub fn is_abandoned(&self) -> bool {
        !self.setup_complete && !self.owner_alive()
    }

    /// Whether the record is older than `days`
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        self.created_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BaseInstanceRecord {
        BaseInstanceRecord::begin(
            "kiln-base-kiln-base-v1-ubuntu-24-04",
            "abc123def456",
            CompatibilityTag::current(),
        )
    }

    #[test]
    fn begin_is_incomplete() {
        let rec = record();
        assert!(!rec.setup_complete);
        assert_eq!(rec.owner_pid, std::process::id());
        assert!(rec.owner_alive());
        assert!(!rec.is_abandoned());
    }

    #[test]
    fn dead_owner_marks_abandoned() {
        let mut rec = record();
        rec.owner_pid = 0;
        assert!(rec.is_abandoned());

        // A completed record is never abandoned, even with a dead owner.
        rec.setup_complete = true;
        assert!(!rec.is_abandoned());
    }

    #[test]
    fn age_check() {
        let mut rec = record();
        assert!(!rec.is_older_than_days(90));
        rec.created_at = Utc::now() - Duration::days(91);
        assert!(rec.is_older_than_days(90));
    }

    #[test]
    fn record_serde_roundtrip() {
        let rec = record();
        let json = serde_json::to_string_pretty(&rec).unwrap();
        let parsed: BaseInstanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.instance_name, rec.instance_name);
        assert_eq!(parsed.compatibility_tag, rec.compatibility_tag);
        assert_eq!(parsed.owner_token, rec.owner_token);
    }
}

//! Base instance cache
//!
//! Tracks known base instances through sidecar records and decides reuse
//! versus rebuild versus expiry. The decision must be re-evaluated after
//! taking the provisioning lock (double-checked locking): another process
//! may have completed or invalidated the base in between.

use crate::base::record::BaseInstanceRecord;
use crate::base::tag::CompatibilityTag;
use crate::error::{KilnError, KilnResult};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// Outcome of the reuse-vs-rebuild policy, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReuseDecision {
    /// No record exists; provision from scratch
    Provision,
    /// Record is incomplete and its owner died; invalidate and reprovision
    ReclaimAbandoned,
    /// Tag differs from the caller's required tag; destroy and reprovision
    Incompatible { found: CompatibilityTag },
    /// Base outlived the expiry window; destroy and reprovision
    Expired { age_days: i64 },
    /// Base is complete, compatible, and fresh
    Reuse,
}

impl ReuseDecision {
    /// Whether the decision allows cloning without reprovisioning
    pub fn is_reuse(&self) -> bool {
        matches!(self, Self::Reuse)
    }

    /// Whether an old instance must be destroyed before reprovisioning
    pub fn needs_cleanup(&self) -> bool {
        matches!(
            self,
            Self::ReclaimAbandoned | Self::Incompatible { .. } | Self::Expired { .. }
        )
    }
}

/// Store of base instance records, one JSON document per cache key.
#[derive(Debug, Clone)]
pub struct BaseInstanceCache {
    records_dir: PathBuf,
}

impl BaseInstanceCache {
    /// Create a cache rooted at the given records directory
    pub fn new(records_dir: PathBuf) -> Self {
        Self { records_dir }
    }

    fn record_path(&self, cache_key: &str) -> PathBuf {
        self.records_dir.join(format!("{cache_key}.json"))
    }

    /// Load the record for a cache key.
    ///
    /// A record that fails to parse is treated as dirty: it is removed and
    /// reported absent, forcing a clean reprovision rather than an error.
    pub async fn lookup(&self, cache_key: &str) -> KilnResult<Option<BaseInstanceRecord>> {
        let path = self.record_path(cache_key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading base record {}", path.display()), e))?;

        match serde_json::from_str::<BaseInstanceRecord>(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding unreadable base record {}: {}", path.display(), e);
                fs::remove_file(&path).await.ok();
                Ok(None)
            }
        }
    }

    /// Write (or overwrite) the record for its cache key
    pub async fn commit(&self, record: &BaseInstanceRecord) -> KilnResult<()> {
        fs::create_dir_all(&self.records_dir).await.map_err(|e| {
            KilnError::io(
                format!("creating records dir {}", self.records_dir.display()),
                e,
            )
        })?;

        let path = self.record_path(&record.cache_key);
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&path, content)
            .await
            .map_err(|e| KilnError::io(format!("writing base record {}", path.display()), e))?;

        debug!(
            "Committed base record {} (setup_complete: {})",
            record.cache_key, record.setup_complete
        );
        Ok(())
    }

    /// Delete the record for a cache key, if present
    pub async fn invalidate(&self, cache_key: &str) -> KilnResult<()> {
        let path = self.record_path(cache_key);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| KilnError::io(format!("removing base record {}", path.display()), e))?;
            debug!("Invalidated base record {cache_key}");
        }
        Ok(())
    }

    /// List all known records
    pub async fn list(&self) -> KilnResult<Vec<BaseInstanceRecord>> {
        if !self.records_dir.exists() {
            return Ok(vec![]);
        }

        let mut records = vec![];
        let mut entries = fs::read_dir(&self.records_dir)
            .await
            .map_err(|e| KilnError::io("reading base records directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io("reading base record entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(content) = fs::read_to_string(&path).await {
                    if let Ok(record) = serde_json::from_str::<BaseInstanceRecord>(&content) {
                        records.push(record);
                    }
                }
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Apply the ordered reuse policy to a looked-up record.
    ///
    /// Checks run in a fixed order; the first that fires wins:
    /// absent, abandoned, incompatible tag, expired, reuse.
    pub fn evaluate(
        record: Option<&BaseInstanceRecord>,
        required_tag: &CompatibilityTag,
        expiry_days: u32,
    ) -> ReuseDecision {
        let Some(record) = record else {
            return ReuseDecision::Provision;
        };

        if record.is_abandoned() {
            return ReuseDecision::ReclaimAbandoned;
        }

        if !record.setup_complete {
            // Owner is still alive and mid-setup; treat as contention and
            // let the lock arbitrate. Reported as Provision so the caller
            // queues on the lock and re-evaluates.
            return ReuseDecision::Provision;
        }

        if record.compatibility_tag != *required_tag {
            return ReuseDecision::Incompatible {
                found: record.compatibility_tag.clone(),
            };
        }

        if record.is_older_than_days(expiry_days) {
            let age_days = (chrono::Utc::now() - record.created_at).num_days();
            return ReuseDecision::Expired { age_days };
        }

        ReuseDecision::Reuse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> BaseInstanceCache {
        BaseInstanceCache::new(dir.path().join("bases"))
    }

    fn complete_record() -> BaseInstanceRecord {
        let mut rec = BaseInstanceRecord::begin("kiln-base-x", "abc123", CompatibilityTag::current());
        rec.setup_complete = true;
        rec
    }

    #[tokio::test]
    async fn lookup_absent() {
        let dir = TempDir::new().unwrap();
        assert!(cache(&dir).lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_lookup_invalidate() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let rec = complete_record();

        cache.commit(&rec).await.unwrap();
        let loaded = cache.lookup("abc123").await.unwrap().unwrap();
        assert_eq!(loaded.instance_name, rec.instance_name);
        assert!(loaded.setup_complete);

        cache.invalidate("abc123").await.unwrap();
        assert!(cache.lookup("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        std::fs::create_dir_all(dir.path().join("bases")).unwrap();
        std::fs::write(dir.path().join("bases").join("bad.json"), "not json").unwrap();

        assert!(cache.lookup("bad").await.unwrap().is_none());
        // The dirty file was removed.
        assert!(!dir.path().join("bases").join("bad.json").exists());
    }

    #[tokio::test]
    async fn list_sorted_by_age() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);

        let mut old = complete_record();
        old.cache_key = "old111111111".to_string();
        old.created_at = Utc::now() - Duration::days(10);
        let mut new = complete_record();
        new.cache_key = "new222222222".to_string();

        cache.commit(&new).await.unwrap();
        cache.commit(&old).await.unwrap();

        let listed = cache.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].cache_key, "old111111111");
    }

    #[test]
    fn evaluate_absent() {
        let decision =
            BaseInstanceCache::evaluate(None, &CompatibilityTag::current(), 90);
        assert_eq!(decision, ReuseDecision::Provision);
        assert!(!decision.needs_cleanup());
    }

    #[test]
    fn evaluate_abandoned_before_tag() {
        // Abandoned wins even when the tag also mismatches: check order.
        let mut rec = BaseInstanceRecord::begin("x", "k", CompatibilityTag::new("base-v0"));
        rec.owner_pid = 0;
        let decision = BaseInstanceCache::evaluate(Some(&rec), &CompatibilityTag::new("base-v1"), 90);
        assert_eq!(decision, ReuseDecision::ReclaimAbandoned);
        assert!(decision.needs_cleanup());
    }

    #[test]
    fn evaluate_in_progress_with_live_owner() {
        let rec = BaseInstanceRecord::begin("x", "k", CompatibilityTag::current());
        let decision = BaseInstanceCache::evaluate(Some(&rec), &CompatibilityTag::current(), 90);
        assert_eq!(decision, ReuseDecision::Provision);
    }

    #[test]
    fn evaluate_incompatible_tag() {
        let mut rec = BaseInstanceRecord::begin("x", "k", CompatibilityTag::new("base-v7"));
        rec.setup_complete = true;
        let decision =
            BaseInstanceCache::evaluate(Some(&rec), &CompatibilityTag::new("base-v8"), 90);
        assert_eq!(
            decision,
            ReuseDecision::Incompatible {
                found: CompatibilityTag::new("base-v7")
            }
        );
    }

    #[test]
    fn evaluate_expired() {
        let mut rec = complete_record();
        rec.created_at = Utc::now() - Duration::days(120);
        let decision = BaseInstanceCache::evaluate(Some(&rec), &CompatibilityTag::current(), 90);
        assert!(matches!(decision, ReuseDecision::Expired { age_days } if age_days >= 120));
    }

    #[test]
    fn evaluate_reuse() {
        let rec = complete_record();
        let decision = BaseInstanceCache::evaluate(Some(&rec), &CompatibilityTag::current(), 90);
        assert!(decision.is_reuse());
    }
}

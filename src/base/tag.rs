//! Compatibility tags for cached base instances
//!
//! A tag marks the shape of setup work applied to a base. Two bases are
//! interchangeable only if their tags match exactly; a mismatch forces a
//! rebuild. Bump [`CURRENT_TAG`] whenever the setup semantics change in a
//! way that makes previously-built bases unusable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag applied to bases built by this version of kiln.
///
/// Client tools embedding kiln may extend rather than replace it, e.g.
/// `"myapp-kiln-base-v1.3"`, so their own setup revisions also invalidate.
pub const CURRENT_TAG: &str = "kiln-base-v1";

/// Versioned marker identifying the setup variant applied to a base.
///
/// Opaque: only exact equality matters. Never rewritten in place on an
/// existing base; a tag change always implies instance recreation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompatibilityTag(String);

impl CompatibilityTag {
    /// Wrap an explicit tag value
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag for bases built by this kiln version
    pub fn current() -> Self {
        Self(CURRENT_TAG.to_string())
    }

    /// String form of the tag
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CompatibilityTag {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for CompatibilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_tag() {
        assert_eq!(CompatibilityTag::current().as_str(), CURRENT_TAG);
        assert_eq!(CompatibilityTag::default(), CompatibilityTag::current());
    }

    #[test]
    fn exact_equality_only() {
        let v0 = CompatibilityTag::new("base-v0");
        let v1 = CompatibilityTag::new("base-v1");
        assert_ne!(v0, v1);
        assert_eq!(v0, CompatibilityTag::new("base-v0"));
    }

    #[test]
    fn serde_transparent() {
        let tag = CompatibilityTag::new("base-v7");
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"base-v7\"");
        let parsed: CompatibilityTag = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tag);
    }
}

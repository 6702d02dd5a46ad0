//! Shared scalar types and small helpers: ids, roles, timestamps,
//! attempt nonces, and Unicode normalization.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Row identifier for every entity.
pub type Id = i64;

/// The role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access to unrestricted resources.
    Viewer,
    /// May create and mutate resources.
    Contributor,
    /// Full access, including restricted resources and global jobs.
    Administrator,
}

impl Role {
    /// Parse from the stored lowercase string.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "viewer" => Some(Role::Viewer),
            "contributor" => Some(Role::Contributor),
            "administrator" => Some(Role::Administrator),
            _ => None,
        }
    }

    /// The stored lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Contributor => "contributor",
            Role::Administrator => "administrator",
        }
    }
}

/// The current UTC time, truncated to whole seconds.
///
/// Sub-second precision is dropped on purpose: MySQL InnoDB rounds
/// microseconds away, and timestamps must compare equal across a write
/// and a read-back regardless of backend.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// A fresh resource UUID.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// A fresh attempt nonce.
///
/// Written to a resource's `compile_attempt` / `generate_attempt` /
/// `perplexity_attempt` field each time a background build is enqueued;
/// clients correlate polling with their own request by comparing nonces.
pub fn new_attempt() -> String {
    Uuid::new_v4().to_string()
}

/// NFD-normalize user-supplied text.
///
/// All persisted linguistic text and all search patterns go through this
/// so that byte-level comparisons in SQL agree with what contributors
/// typed, whatever their input method composed.
pub fn normalize(s: &str) -> String {
    s.nfd().collect()
}

/// NFC-normalize a filename fragment.
pub fn normalize_nfc(s: &str) -> String {
    s.nfc().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for name in ["viewer", "contributor", "administrator"] {
            assert_eq!(Role::parse(name).unwrap().as_str(), name);
        }
        assert!(Role::parse("admin").is_none());
    }

    #[test]
    fn test_now_has_no_subseconds() {
        assert_eq!(now().timestamp_subsec_micros(), 0);
    }

    #[test]
    fn test_normalize_decomposes() {
        // U+00E9 (precomposed é) decomposes to e + U+0301
        assert_eq!(normalize("\u{00e9}"), "e\u{0301}");
        assert_eq!(normalize_nfc("e\u{0301}"), "\u{00e9}");
    }

    #[test]
    fn test_attempt_nonces_are_unique() {
        assert_ne!(new_attempt(), new_attempt());
    }
}

//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A single cache entry with value and metadata.
///
/// This is also the record written to the backing store, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Creation timestamp (milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (milliseconds), None = no expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped at `now_ms`.
    ///
    /// A zero TTL means the entry never expires.
    pub fn new(value: Value, now_ms: u64, ttl: Option<Duration>) -> Self {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| now_ms.saturating_add(ttl.as_millis() as u64));

        Self {
            value,
            created_at: now_ms,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// An entry is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(now_ms))
    }

    /// Best-effort size estimate: key plus serialized value.
    pub fn approx_size(&self, key: &str) -> usize {
        key.len() + self.value.to_string().len()
    }
}

// == Set Options ==
/// Per-call options for [`CacheStore::set`](crate::cache::CacheStore::set).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time-to-live; `None` falls back to the store default, zero = no expiry
    pub ttl: Option<Duration>,
    /// Entry cap for this insertion; `None` falls back to the store default
    pub max_size: Option<usize>,
}

impl SetOptions {
    /// Options with the given TTL.
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            max_size: None,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new(json!("test_value"), 1_000, None);

        assert_eq!(entry.value, json!("test_value"));
        assert_eq!(entry.created_at, 1_000);
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(u64::MAX));
    }

    #[test]
    fn test_entry_zero_ttl_never_expires() {
        let entry = CacheEntry::new(json!(1), 1_000, Some(Duration::ZERO));
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn test_entry_expiration_boundary() {
        let entry = CacheEntry::new(json!(1), 1_000, Some(Duration::from_millis(500)));

        assert_eq!(entry.expires_at, Some(1_500));
        assert!(!entry.is_expired(1_499));
        // Expired exactly at the deadline
        assert!(entry.is_expired(1_500));
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new(json!(1), 1_000, Some(Duration::from_secs(10)));

        assert_eq!(entry.ttl_remaining_ms(1_000), Some(10_000));
        assert_eq!(entry.ttl_remaining_ms(20_000), Some(0));
        assert!(CacheEntry::new(json!(1), 0, None).ttl_remaining_ms(0).is_none());
    }

    #[test]
    fn test_persisted_shape() {
        let entry = CacheEntry::new(json!({"title": "Engineer"}), 7, None);
        let raw = serde_json::to_string(&entry).unwrap();
        assert_eq!(raw, r#"{"value":{"title":"Engineer"},"created_at":7}"#);

        let back: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, entry);
    }
}

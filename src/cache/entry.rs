//! Cache Entry Module
//!
//! Defines the persisted form of a cache entry with TTL support.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A single entry of the shared data area, one file per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// When the owning process accepted the write (Unix milliseconds)
    pub arrive_at: u64,
    /// Lifetime in milliseconds, None = the configured maximum TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Identity of the process that wrote the entry
    pub owner_process_id: String,
}

impl CacheEntry {
    // == Constructor ==
    /// Builds an entry purely from the write's own fields.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `arrive_at` - Acceptance timestamp in Unix milliseconds
    /// * `ttl` - Optional TTL in milliseconds
    /// * `owner_process_id` - The writing process
    pub fn new(value: Value, arrive_at: u64, ttl: Option<u64>, owner_process_id: impl Into<String>) -> Self {
        Self {
            value,
            arrive_at,
            ttl,
            owner_process_id: owner_process_id.into(),
        }
    }

    /// Lifetime that applies to this entry.
    pub fn effective_ttl(&self, max_ttl: u64) -> u64 {
        self.ttl.unwrap_or(max_ttl)
    }

    /// Age of the entry at `now`, zero if `now` precedes arrival.
    pub fn age_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.arrive_at)
    }

    // == Is Expired ==
    /// Checks whether the entry has outlived its TTL at `now`.
    ///
    /// An entry aged exactly its TTL is still valid; it expires strictly after.
    pub fn is_expired_at(&self, now: u64, max_ttl: u64) -> bool {
        self.age_at(now) > self.effective_ttl(max_ttl)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

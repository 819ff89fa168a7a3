//! Cache Statistics Module
//!
//! Tracks cache activity: where reads were served from, misses, and writes.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache activity counters for this process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads served from the in-memory mapping
    pub memory_hits: u64,
    /// Reads served from the shared data area
    pub file_hits: u64,
    /// Reads that found nothing (absent or expired)
    pub misses: u64,
    /// Completed set operations
    pub sets: u64,
    /// Completed reset operations
    pub resets: u64,
    /// Current number of entries in the in-memory mapping
    pub memory_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total reads that returned a value.
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.file_hits
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_file_hit(&mut self) {
        self.file_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_reset(&mut self) {
        self.resets += 1;
    }

    /// Updates the in-memory entry count.
    pub fn set_memory_entries(&mut self, count: usize) {
        self.memory_entries = count;
    }
}

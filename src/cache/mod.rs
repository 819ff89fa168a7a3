//! Cache Module
//!
//! Provides the dual-mode cache: a process-local mapping optionally backed
//! by a shared on-disk store with TTL expiration.

mod entry;
mod facade;
pub mod key_codec;
mod memory;
mod stats;
mod store;


// Re-export public types
pub use entry::{now_ms, CacheEntry};
pub use facade::Cache;
pub use memory::MemoryStore;
pub use stats::CacheStats;
pub use store::{load_entry, DataStore};

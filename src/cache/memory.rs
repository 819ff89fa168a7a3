//! Memory Store Module
//!
//! Process-local key/value mapping used in front of (or instead of) the
//! shared data area.

use std::collections::HashMap;

use serde_json::Value;

// == Memory Store ==
/// Process-local cache storage. Nothing here is persisted or shared.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Key-value storage
    entries: HashMap<String, Value>,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty MemoryStore.
    pub fn new() -> Self {
        Self::default()
    }

    // == Set ==
    /// Stores a key-value pair, overwriting any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    // == Get ==
    /// Retrieves a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    // == Remove ==
    /// Removes an entry by key, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == Length ==
    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_new() {
        let store = MemoryStore::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_set_and_get() {
        let mut store = MemoryStore::new();

        store.set("key1", json!({"a": 1}));

        assert_eq!(store.get("key1"), Some(json!({"a": 1})));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_get_nonexistent() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nonexistent"), None);
    }

    #[test]
    fn test_memory_overwrite() {
        let mut store = MemoryStore::new();

        store.set("key1", json!("value1"));
        store.set("key1", json!("value2"));

        assert_eq!(store.get("key1"), Some(json!("value2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_remove() {
        let mut store = MemoryStore::new();

        store.set("key1", json!(1));
        assert!(store.remove("key1"));
        assert!(!store.remove("key1"));
        assert!(store.is_empty());
    }
}

//! In-memory state store
//!
//! Maps normalized keys to their last-known value. An entry appears on the
//! first update for its key and lives as long as the store.

use std::collections::HashMap;

use serde_json::Value;

/// Last-write-wins key/value store
#[derive(Debug, Default)]
pub struct StateStore {
    entries: HashMap<String, Value>,
}

impl StateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for a normalized key, `None` if never written
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Replace the value for a normalized key, returning the previous one
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Whether a value has ever been written for the key
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys with a value
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over normalized keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

//! Key-value store abstraction
//!
//! The external store exposes get/set/delete by string key plus key
//! enumeration, with no transactional guarantees across keys. Persistent
//! backends plug in behind this trait; the in-memory implementation backs
//! tests and single-process deployments.

use dashmap::DashMap;

use crumb_types::CrumbResult;

/// Raw key-value storage trait
pub trait KvStore: Send + Sync {
    /// Read the raw value stored under `key`
    fn get(&self, key: &str) -> CrumbResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Vec<u8>) -> CrumbResult<()>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&self, key: &str) -> CrumbResult<()>;

    /// Enumerate every key currently in the store
    fn keys(&self) -> CrumbResult<Vec<String>>;

    /// Check if a key exists
    fn contains(&self, key: &str) -> bool {
        self.get(key).ok().flatten().is_some()
    }
}

/// In-memory store using DashMap for concurrent access
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> CrumbResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> CrumbResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> CrumbResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> CrumbResult<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// Convenience for trait objects and shared references
impl<K: KvStore + ?Sized> KvStore for std::sync::Arc<K> {
    fn get(&self, key: &str) -> CrumbResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> CrumbResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> CrumbResult<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> CrumbResult<Vec<String>> {
        (**self).keys()
    }
}

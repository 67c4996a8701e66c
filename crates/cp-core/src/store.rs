//! Key/value persistence used by the engine
//!
//! The backing store is supplied by the host environment (`localStorage` in
//! a page, a JSON file on the command line, a map in tests). It offers no
//! key enumeration, so every key this crate writes is also appended to the
//! [`CacheIndex`] stored under [`INDEX_KEY`].

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key holding the ordered list of every key written through the engine.
pub const INDEX_KEY: &str = "cache.index";

/// Error type for store access.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Minimal string key/value store.
///
/// Methods take `&self`: the store is shared by the fetcher and the host
/// cache inside one single-threaded document context.
pub trait CacheStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

impl<S: CacheStore + ?Sized> CacheStore for &S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }
}

/// Read and decode a JSON value. Undecodable entries read as absent.
pub fn get_json<T: DeserializeOwned>(store: &impl CacheStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Ignoring undecodable cache entry {}: {}", key, e);
            None
        }
    }
}

/// Encode and write a JSON value.
pub fn set_json<T: Serialize>(store: &impl CacheStore, key: &str, value: &T) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw)
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory store, used by tests and as a scratch backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

// =============================================================================
// Cache Index
// =============================================================================

/// Explicit registry of every key written through the engine.
pub struct CacheIndex<'a, S: CacheStore> {
    store: &'a S,
}

impl<'a, S: CacheStore> CacheIndex<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// All registered keys, in registration order.
    pub fn keys(&self) -> Vec<String> {
        get_json(self.store, INDEX_KEY).unwrap_or_default()
    }

    /// Append `key` unless it is already present.
    pub fn register(&self, key: &str) -> Result<(), StoreError> {
        let mut keys = self.keys();
        if keys.iter().any(|k| k == key) {
            return Ok(());
        }
        keys.push(key.to_string());
        set_json(self.store, INDEX_KEY, &keys)
    }

    /// Write a value and register its key.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store.set(key, value)?;
        self.register(key)
    }

    /// Write a JSON value and register its key.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        set_json(self.store, key, value)?;
        self.register(key)
    }

    /// Delete `key` and drop it from the index.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key)?;
        let mut keys = self.keys();
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            set_json(self.store, INDEX_KEY, &keys)?;
        }
        Ok(())
    }

    /// Delete every indexed key, then the index itself. Returns the number
    /// of keys removed.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let keys = self.keys();
        for key in &keys {
            self.store.delete(key)?;
        }
        self.store.delete(INDEX_KEY)?;
        log::info!("Cleared {} cached entries", keys.len());
        Ok(keys.len())
    }
}

// =============================================================================
// Key Layout
// =============================================================================

pub mod keys {
    //! Store key layout.

    use crate::hash::hash_url;

    pub fn remote_etag(namespace: &str, url: &str) -> String {
        format!("remote.{}.etag.{}", namespace, hash_url(url))
    }

    pub fn remote_last_modified(namespace: &str, url: &str) -> String {
        format!("remote.{}.lm.{}", namespace, hash_url(url))
    }

    pub fn remote_data(namespace: &str, url: &str) -> String {
        format!("remote.{}.data.{}", namespace, hash_url(url))
    }

    /// Per-namespace map of `hash(url)` to last fetch time.
    pub fn remote_timestamps(namespace: &str) -> String {
        format!("remote.{}.ts", namespace)
    }

    pub fn host_rules(host: &str, signature: &str) -> String {
        format!("cache.host.{}.{}", host, signature)
    }
}

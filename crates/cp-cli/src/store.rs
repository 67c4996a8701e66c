//! JSON file backed cache store.
//!
//! The whole map is rewritten on every mutation. Lists are a few hundred
//! kilobytes at most and the CLI writes a handful of keys per run.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cp_core::store::{CacheStore, StoreError};

pub struct JsonFileStore {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self, String> {
        let entries = if path.exists() {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read store '{}': {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("Store '{}' is not a JSON object of strings: {}", path.display(), e))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: RefCell::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn persist(&self) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&*self.entries.borrow()).map_err(|source| StoreError::Encode {
            key: self.path.display().to_string(),
            source,
        })?;
        fs::write(&self.path, text)
            .map_err(|e| StoreError::Backend(format!("Failed to write '{}': {}", self.path.display(), e)))
    }
}

impl CacheStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.entries.borrow_mut().remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cp-cli-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_values_survive_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        let store = JsonFileStore::open(&path).unwrap();
        store.set("remote.packs.ts", "{}").unwrap();
        store.set("gone", "x").unwrap();
        store.delete("gone").unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("remote.packs.ts").as_deref(), Some("{}"));
        assert_eq!(reopened.len(), 1);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_non_object_file() {
        let path = temp_path("garbage");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}

//! Persisted client/tenant overrides.
//!
//! Values written here take effect on the next initialization only.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use crate::error::StoreError;

/// Key holding the persisted client id.
pub const CLIENT_ID_KEY: &str = "msal_client_id";
/// Key holding the persisted tenant id.
pub const TENANT_ID_KEY: &str = "msal_tenant_id";

/// Key/value storage that survives restarts.
pub trait OverrideStore: Send + Sync {
    /// Read a value. Missing keys and unreadable storage both yield `None`.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Override store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileOverrideStore {
    path: PathBuf,
}

impl FileOverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries. A missing or corrupt file reads as empty.
    fn load(&self) -> BTreeMap<String, String> {
        if !self.path.exists() {
            return BTreeMap::new();
        }

        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("Failed to parse override file {:?}: {}", self.path, e);
                    BTreeMap::new()
                }
            },
            Err(e) => {
                error!("Failed to read override file {:?}: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)?;

        debug!("Saved overrides to {:?}", self.path);
        Ok(())
    }
}

impl OverrideStore for FileOverrideStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.load();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }
}

/// In-memory override store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryOverrideStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOverrideStore::new(dir.path().join("nested").join("overrides.json"));

        assert_eq!(store.get(CLIENT_ID_KEY), None);

        store.set(CLIENT_ID_KEY, "abc").unwrap();
        store.set(TENANT_ID_KEY, "contoso").unwrap();
        assert_eq!(store.get(CLIENT_ID_KEY).as_deref(), Some("abc"));

        // A second handle on the same file sees the write.
        let reopened = FileOverrideStore::new(store.path());
        assert_eq!(reopened.get(TENANT_ID_KEY).as_deref(), Some("contoso"));

        store.remove(CLIENT_ID_KEY).unwrap();
        assert_eq!(reopened.get(CLIENT_ID_KEY), None);
        assert_eq!(reopened.get(TENANT_ID_KEY).as_deref(), Some("contoso"));
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOverrideStore::new(dir.path().join("overrides.json"));

        assert!(store.remove(CLIENT_ID_KEY).is_ok());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileOverrideStore::new(&path);
        assert_eq!(store.get(CLIENT_ID_KEY), None);

        // Writing replaces the corrupt content.
        store.set(CLIENT_ID_KEY, "abc").unwrap();
        assert_eq!(store.get(CLIENT_ID_KEY).as_deref(), Some("abc"));
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryOverrideStore::new();
        let other = store.clone();

        store.set(CLIENT_ID_KEY, "abc").unwrap();
        assert_eq!(other.get(CLIENT_ID_KEY).as_deref(), Some("abc"));

        other.remove(CLIENT_ID_KEY).unwrap();
        assert_eq!(store.get(CLIENT_ID_KEY), None);
    }
}

//! Durable client-side key/value storage for the session.
//!
//! Only two keys are ever written: [`TOKEN_KEY`] and [`USERNAME_KEY`]. The refresh
//! credential never passes through here; it stays in the HTTP client's cookie jar.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::StoreError;

pub const TOKEN_KEY: &str = "token";
pub const USERNAME_KEY: &str = "username";

pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Forget the whole session.
    fn clear(&self) -> Result<(), StoreError> {
        self.remove(TOKEN_KEY)?;
        self.remove(USERNAME_KEY)
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        let store = Self::default();
        locked(&store.values).insert(TOKEN_KEY.to_string(), token.to_string());
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(locked(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        locked(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        locked(&self.values).remove(key);
        Ok(())
    }
}

/// JSON document on disk, rewritten through a temp file on every change.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileTokenStore {
    /// Open the store, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(values).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(locked(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = locked(&self.values);
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = locked(&self.values);
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_clear_removes_both_keys() {
        let store = MemoryTokenStore::with_token("abc");
        store.set(USERNAME_KEY, "ann").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileTokenStore::open(&path).unwrap();
        store.set(TOKEN_KEY, "access-1").unwrap();
        store.set(USERNAME_KEY, "ann").unwrap();
        drop(store);

        let reopened = FileTokenStore::open(&path).unwrap();
        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("access-1"));
        assert_eq!(reopened.get(USERNAME_KEY).unwrap().as_deref(), Some("ann"));
    }

    #[test]
    fn file_store_clear_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let store = FileTokenStore::open(&path).unwrap();
        store.set(TOKEN_KEY, "access-1").unwrap();
        store.clear().unwrap();

        let reopened = FileTokenStore::open(&path).unwrap();
        assert_eq!(reopened.get(TOKEN_KEY).unwrap(), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileTokenStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn file_store_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::open(dir.path().join("absent.json")).unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }
}

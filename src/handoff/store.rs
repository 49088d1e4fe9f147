//! Key/value backings for the handoff store.
//!
//! `MemoryStore` lives as long as the process; `FileStore` survives it, which
//! is what lets a later `shotmark pending` pick up an earlier area capture.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The durable storage capability: `set`, `get(keys)`, `remove`.
pub trait KeyValueStore: Send + Sync {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let entries = self.entries.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten through a temp file on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", self.path.display(), e))),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::Corrupt(format!("{} is not a JSON object", self.path.display()))),
            Err(e) => Err(StoreError::Corrupt(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn save(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| StoreError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;
            }
        }
        let text = serde_json::to_string(map).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

impl KeyValueStore for FileStore {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let mut map = self.load()?;
        map.insert(key.to_string(), value);
        self.save(&map)
    }

    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let _guard = self.lock.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let map = self.load()?;
        Ok(keys
            .iter()
            .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let mut map = self.load()?;
        if map.remove(key).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(String),

    #[error("Store contents are unreadable: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shotmark-store-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn memory_store_get_returns_only_present_keys() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).unwrap();
        let got = store.get(&["a", "b"]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["a"], json!(1));
        store.remove("a").unwrap();
        assert!(store.get(&["a"]).unwrap().is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        FileStore::new(&path).set("capture-result", json!({"payload": "x"})).unwrap();
        let reopened = FileStore::new(&path);
        let got = reopened.get(&["capture-result"]).unwrap();
        assert_eq!(got["capture-result"]["payload"], "x");

        reopened.remove("capture-result").unwrap();
        assert!(FileStore::new(&path).get(&["capture-result"]).unwrap().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        assert!(FileStore::new(&path).get(&["anything"]).unwrap().is_empty());
    }

    #[test]
    fn file_store_rejects_garbage() {
        let path = temp_path("garbage");
        std::fs::write(&path, "[1, 2").unwrap();
        let result = FileStore::new(&path).get(&["k"]);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        let _ = std::fs::remove_file(&path);
    }
}

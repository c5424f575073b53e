//! Opaque save/load capability for suspended machine state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no saved state for session `{0}`")]
    NotFound(String),
    #[error("invalid session id `{0}`")]
    InvalidId(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait SessionStore: Send + Sync {
    fn save(&self, session_id: &str, state: &serde_json::Value) -> Result<(), StoreError>;
    fn load(&self, session_id: &str) -> Result<serde_json::Value, StoreError>;
}

/// In-process store. State is kept as JSON text so every save/load goes
/// through the same serialization a persistent store would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session_id: &str, state: &serde_json::Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(state)?;
        self.entries.write().insert(session_id.to_string(), text);
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<serde_json::Value, StoreError> {
        let entries = self.entries.read();
        let text = entries
            .get(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(text)?)
    }
}

/// One JSON document per session under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(session_id.to_string()));
        }
        Ok(self.root.join(format!("{session_id}.json")))
    }
}

impl SessionStore for FileStore {
    fn save(&self, session_id: &str, state: &serde_json::Value) -> Result<(), StoreError> {
        let path = self.path_for(session_id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<serde_json::Value, StoreError> {
        let path = self.path_for(session_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.save("a", &json!({"ip": 3})).unwrap();
        assert_eq!(store.load("a").unwrap(), json!({"ip": 3}));
        assert!(matches!(store.load("b"), Err(StoreError::NotFound(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.save("../escape", &json!(null)),
            Err(StoreError::InvalidId(_))
        ));
        store.save("job-1", &json!([1, 2])).unwrap();
        assert_eq!(store.load("job-1").unwrap(), json!([1, 2]));
        assert!(matches!(store.load("job-2"), Err(StoreError::NotFound(_))));
    }
}

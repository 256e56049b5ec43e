//! 4.K Session store: a namespaced durable KV used by the sequence
//! subsystem and the `configure` tool's `store`/`load` modes. File-backed,
//! one JSON blob per namespace under the configured data dir, written with
//! the same atomic write-to-temp-then-rename discipline as the log buffer.

use crate::errors::{Result, RuntimeError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
    async fn load(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
    async fn list(&self, namespace: &str) -> Result<Vec<String>>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// One JSON object per namespace, keyed by `key`, under `<data_dir>/sessions`.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            dir: data_dir.join("sessions"),
        }
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.json"))
    }

    fn load_namespace(&self, namespace: &str) -> HashMap<String, Value> {
        let path = self.namespace_path(namespace);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return HashMap::new();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    fn save_namespace(&self, namespace: &str, entries: &HashMap<String, Value>) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| RuntimeError::Io(e.to_string()))?;
        let path = self.namespace_path(namespace);
        let text = serde_json::to_string_pretty(entries).map_err(|e| RuntimeError::Io(e.to_string()))?;
        let tmp = tmp_path_for(&path);
        std::fs::write(&tmp, text).map_err(|e| RuntimeError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| RuntimeError::Io(e.to_string()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let dir = self.dir.clone();
        let this = FileSessionStore { dir };
        tokio::task::spawn_blocking(move || {
            let mut entries = this.load_namespace(&namespace);
            entries.insert(key, value);
            this.save_namespace(&namespace, &entries)
        })
        .await
        .map_err(|e| RuntimeError::Io(e.to_string()))?
    }

    async fn load(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let dir = self.dir.clone();
        let this = FileSessionStore { dir };
        tokio::task::spawn_blocking(move || {
            let entries = this.load_namespace(&namespace);
            Ok(entries.get(&key).cloned())
        })
        .await
        .map_err(|e| RuntimeError::Io(e.to_string()))?
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let namespace = namespace.to_string();
        let dir = self.dir.clone();
        let this = FileSessionStore { dir };
        tokio::task::spawn_blocking(move || {
            let mut keys: Vec<String> = this.load_namespace(&namespace).into_keys().collect();
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| RuntimeError::Io(e.to_string()))?
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let dir = self.dir.clone();
        let this = FileSessionStore { dir };
        tokio::task::spawn_blocking(move || {
            let mut entries = this.load_namespace(&namespace);
            entries.remove(&key);
            this.save_namespace(&namespace, &entries)
        })
        .await
        .map_err(|e| RuntimeError::Io(e.to_string()))?
    }

    async fn shutdown(&self) -> Result<()> {
        // No open handles or background tasks to flush — every write is
        // already synced (write-then-rename) before `save` returns.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store.save("sequences", "login", json!({"steps": 2})).await.unwrap();
        let loaded = store.load("sequences", "login").await.unwrap();
        assert_eq!(loaded, Some(json!({"steps": 2})));
    }

    #[tokio::test]
    async fn load_missing_key_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        assert_eq!(store.load("sequences", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_sorted_keys_for_namespace_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store.save("sequences", "b", json!(1)).await.unwrap();
        store.save("sequences", "a", json!(2)).await.unwrap();
        store.save("other", "z", json!(3)).await.unwrap();
        assert_eq!(store.list("sequences").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store.save("sequences", "login", json!({})).await.unwrap();
        store.delete("sequences", "login").await.unwrap();
        assert_eq!(store.load("sequences", "login").await.unwrap(), None);
    }
}

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::http::Request;
use crate::runtime::{InMemoryResponseStore, ResponseStore, StoredEntry};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    bodies: HashMap<String, HashMap<String, StoredEntry>>,
    values: HashMap<String, HashMap<String, serde_json::Value>>,
}

/// A [`ResponseStore`] that durably persists to one JSON file on disk,
/// the same load-then-save-on-every-write shape as the teacher's
/// `GlobalConfigManager`. An in-memory [`InMemoryResponseStore`] is kept
/// as the hot path; every mutation re-serializes the whole snapshot, so
/// this is meant for the demo binary and small manifests, not a
/// production-scale cache.
pub struct FileResponseStore {
    path: PathBuf,
    inner: InMemoryResponseStore,
    write_lock: Mutex<()>,
}

impl FileResponseStore {
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let inner = InMemoryResponseStore::new();
        if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let snapshot: Snapshot = serde_json::from_str(&content)
                .unwrap_or_default();
            for (store, table) in snapshot.bodies {
                for (_, entry) in table {
                    inner.put(&store, entry).await?;
                }
            }
            for (store, table) in snapshot.values {
                for (key, value) in table {
                    inner.put_value(&store, &key, value).await?;
                }
            }
        }
        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = Snapshot::default();
        for store in self.inner.store_names().await? {
            let mut table = HashMap::new();
            for req in self.inner.keys(&store).await? {
                if let Some(resp) = self.inner.matches(&store, &req).await? {
                    table.insert(req.cache_key(), StoredEntry { request: req, response: resp });
                }
            }
            if !table.is_empty() {
                snapshot.bodies.insert(store.clone(), table);
            }
            let keys = self.inner.value_keys(&store).await?;
            if !keys.is_empty() {
                let mut vtable = HashMap::new();
                for key in keys {
                    if let Some(v) = self.inner.get_value(&store, &key).await? {
                        vtable.insert(key, v);
                    }
                }
                snapshot.values.insert(store, vtable);
            }
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseStore for FileResponseStore {
    async fn put(&self, store: &str, entry: StoredEntry) -> anyhow::Result<()> {
        self.inner.put(store, entry).await?;
        self.persist().await
    }

    async fn matches(&self, store: &str, req: &Request) -> anyhow::Result<Option<crate::http::Response>> {
        self.inner.matches(store, req).await
    }

    async fn delete(&self, store: &str, req: &Request) -> anyhow::Result<bool> {
        let removed = self.inner.delete(store, req).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn keys(&self, store: &str) -> anyhow::Result<Vec<Request>> {
        self.inner.keys(store).await
    }

    async fn delete_store(&self, store: &str) -> anyhow::Result<()> {
        self.inner.delete_store(store).await?;
        self.persist().await
    }

    async fn store_names(&self) -> anyhow::Result<Vec<String>> {
        self.inner.store_names().await
    }

    async fn put_value(&self, store: &str, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        self.inner.put_value(store, key, value).await?;
        self.persist().await
    }

    async fn get_value(&self, store: &str, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        self.inner.get_value(store, key).await
    }

    async fn delete_value(&self, store: &str, key: &str) -> anyhow::Result<bool> {
        let removed = self.inner.delete_value(store, key).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn value_keys(&self, store: &str) -> anyhow::Result<Vec<String>> {
        self.inner.value_keys(store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = FileResponseStore::open(path.clone()).await.unwrap();
            store.put_value("control", "latest", serde_json::json!("abc123")).await.unwrap();
        }
        let reopened = FileResponseStore::open(path).await.unwrap();
        assert_eq!(
            reopened.get_value("control", "latest").await.unwrap(),
            Some(serde_json::json!("abc123"))
        );
    }
}

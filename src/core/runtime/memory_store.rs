use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::http::Request;
use crate::runtime::{ResponseStore, StoredEntry};

type Bodies = HashMap<String, StoredEntry>;
type Values = HashMap<String, serde_json::Value>;

/// Pure in-memory [`ResponseStore`]. The default for tests and for any
/// embedder that doesn't need the cache to survive a process restart.
/// Cloning the handle (it's `Arc`-backed) gives two drivers a shared
/// store, which is how the restart-recovery scenarios in the test
/// suite simulate a worker cold start without real disk I/O.
#[derive(Clone, Default)]
pub struct InMemoryResponseStore {
    bodies: Arc<RwLock<HashMap<String, Bodies>>>,
    values: Arc<RwLock<HashMap<String, Values>>>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn put(&self, store: &str, entry: StoredEntry) -> anyhow::Result<()> {
        let mut bodies = self.bodies.write().await;
        let table = bodies.entry(store.to_string()).or_default();
        table.insert(entry.request.cache_key(), entry);
        Ok(())
    }

    async fn matches(&self, store: &str, req: &Request) -> anyhow::Result<Option<crate::http::Response>> {
        let bodies = self.bodies.read().await;
        Ok(bodies
            .get(store)
            .and_then(|t| t.get(&req.cache_key()))
            .map(|e| e.response.clone()))
    }

    async fn delete(&self, store: &str, req: &Request) -> anyhow::Result<bool> {
        let mut bodies = self.bodies.write().await;
        Ok(bodies
            .get_mut(store)
            .map(|t| t.remove(&req.cache_key()).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, store: &str) -> anyhow::Result<Vec<Request>> {
        let bodies = self.bodies.read().await;
        Ok(bodies
            .get(store)
            .map(|t| t.values().map(|e| e.request.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_store(&self, store: &str) -> anyhow::Result<()> {
        self.bodies.write().await.remove(store);
        self.values.write().await.remove(store);
        Ok(())
    }

    async fn store_names(&self) -> anyhow::Result<Vec<String>> {
        let bodies = self.bodies.read().await;
        let values = self.values.read().await;
        let mut names: Vec<String> = bodies.keys().chain(values.keys()).cloned().collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn put_value(&self, store: &str, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut values = self.values.write().await;
        values.entry(store.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn get_value(&self, store: &str, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let values = self.values.read().await;
        Ok(values.get(store).and_then(|t| t.get(key)).cloned())
    }

    async fn delete_value(&self, store: &str, key: &str) -> anyhow::Result<bool> {
        let mut values = self.values.write().await;
        Ok(values.get_mut(store).map(|t| t.remove(key).is_some()).unwrap_or(false))
    }

    async fn value_keys(&self, store: &str) -> anyhow::Result<Vec<String>> {
        let values = self.values.read().await;
        Ok(values.get(store).map(|t| t.keys().cloned().collect()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};

    #[tokio::test]
    async fn put_then_matches_round_trips() {
        let store = InMemoryResponseStore::new();
        let req = Request::get("/foo.txt");
        let resp = Response::new(200, b"hi".to_vec());
        store
            .put("assets", StoredEntry { request: req.clone(), response: resp.clone() })
            .await
            .unwrap();
        let found = store.matches("assets", &req).await.unwrap().unwrap();
        assert_eq!(found.body, b"hi");
    }

    #[tokio::test]
    async fn value_table_is_independent_per_store_name() {
        let store = InMemoryResponseStore::new();
        store.put_value("control", "latest", serde_json::json!("abc")).await.unwrap();
        assert!(store.get_value("other", "latest").await.unwrap().is_none());
        assert_eq!(
            store.get_value("control", "latest").await.unwrap(),
            Some(serde_json::json!("abc"))
        );
    }

    #[tokio::test]
    async fn shared_handle_sees_writes_from_clone() {
        let store = InMemoryResponseStore::new();
        let clone = store.clone();
        clone.put_value("control", "latest", serde_json::json!(1)).await.unwrap();
        assert_eq!(store.get_value("control", "latest").await.unwrap(), Some(serde_json::json!(1)));
    }
}

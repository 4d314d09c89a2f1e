use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct InFlight<T, E> {
    notify: Arc<Notify>,
    result: Mutex<Option<Result<T, E>>>,
}

/// Deduplicates concurrent executions keyed by a string (in the asset
/// group, a URL): the first caller for a key runs the work and shares
/// its result with every other caller that arrives before it finishes.
/// Adapted for a shared *result* rather than a bare "did I run"
/// boolean, since `fetchAndCacheOnce`'s joiners need the response the
/// first caller produced, not just a signal that it's done.
pub struct SingleFlight<T: Clone + Send + 'static, E: Clone + Send + 'static> {
    registry: Mutex<HashMap<String, Arc<InFlight<T, E>>>>,
}

impl<T: Clone + Send + 'static, E: Clone + Send + 'static> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static, E: Clone + Send + 'static> SingleFlight<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// If another call for `key` is already in flight, await its
    /// result. Otherwise run `task` and share the outcome with anyone
    /// who joins before it finishes. Returns `(result, was_executor)`
    /// so callers can tell whether they actually performed the work
    /// (the asset group's unhashed-metadata write only happens for the
    /// executor).
    pub async fn join_or_execute<F, Fut>(&self, key: &str, task: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<&'static str>,
    {
        let existing = {
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get(key) {
                Some(Arc::clone(entry))
            } else {
                registry.insert(
                    key.to_string(),
                    Arc::new(InFlight {
                        notify: Arc::new(Notify::new()),
                        result: Mutex::new(None),
                    }),
                );
                None
            }
        };

        if let Some(entry) = existing {
            entry.notify.notified().await;
            let result = entry.result.lock().await.clone();
            return (
                result.unwrap_or_else(|| Err("single-flight joiner observed no result".into())),
                false,
            );
        }

        // We are the executor. Removal of the in-flight entry happens
        // in every exit path below, mirroring the design doc's
        // guaranteed-on-exit cleanup.
        let result = task().await;

        let entry = {
            let mut registry = self.registry.lock().await;
            registry.remove(key)
        };
        if let Some(entry) = entry {
            *entry.result.lock().await = Some(result.clone());
            entry.notify.notify_waiters();
        }

        (result, true)
    }
}

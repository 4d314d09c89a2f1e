use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::errors::Error;
use crate::http::{Method, Request, Response};
use crate::lru::Lru;
use crate::manifest::DataGroupConfig;
use crate::runtime::{Clock, NetworkTransport, ResponseStore, StoredEntry, Timer};
use crate::store::{Db, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgeEntry {
    ts: i64,
}

/// Everything one data group needs besides its own config: compiled
/// patterns and the backing named stores, mirroring
/// [`crate::asset_group::AssetGroupContext`].
pub struct DataGroupContext {
    pub config: DataGroupConfig,
    pub cache_store_name: String,
    pub age_table: Table,
    pub store: Arc<dyn ResponseStore>,
    pub transport: Arc<dyn NetworkTransport>,
    pub clock: Arc<dyn Clock>,
    pub timer: Arc<dyn Timer>,
    pub patterns: Vec<Regex>,
}

impl DataGroupContext {
    pub fn new(
        db: &Db,
        manifest_hash: &str,
        config: DataGroupConfig,
        store: Arc<dyn ResponseStore>,
        transport: Arc<dyn NetworkTransport>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn Timer>,
    ) -> Result<Self, Error> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Internal(format!("bad pattern {p:?}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let age_table = db.open(&format!("{manifest_hash}:data:{}:age", config.name));
        Ok(Self {
            cache_store_name: format!("{manifest_hash}:data:{}:cache", config.name),
            age_table,
            config,
            store,
            transport,
            clock,
            timer,
            patterns,
        })
    }

    fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }
}

/// A dynamic, bounded, time-limited cache for one data group: LRU
/// eviction at `maxSize`, TTL eviction at `maxAge`, and an optional
/// network-timeout fallback.
pub struct DataGroup {
    ctx: DataGroupContext,
    lru: Arc<Mutex<Lru>>,
}

impl DataGroup {
    pub async fn load(ctx: DataGroupContext, db: &Db, manifest_hash: &str) -> Result<Self, Error> {
        let lru_table = db.open(&format!("{manifest_hash}:data:{}:lru", ctx.config.name));
        let lru = Lru::load(lru_table).await?;
        Ok(Self { ctx, lru: Arc::new(Mutex::new(lru)) })
    }

    pub fn name(&self) -> &str {
        &self.ctx.config.name
    }

    pub fn matches_request(&self, req: &Request) -> bool {
        self.ctx.matches(&req.url)
    }

    /// Serves a matched request per the method dispatch in the design
    /// doc: `OPTIONS` passes through untouched, `GET`/`HEAD` go through
    /// the cache, anything else purges and forwards.
    pub async fn handle(&self, req: &Request) -> Result<Option<Response>, Error> {
        if !self.matches_request(req) {
            return Ok(None);
        }
        match req.method {
            Method::Options => Ok(None),
            m if m.is_cacheable_read() => self.handle_read(req).await.map(Some),
            _ => self.handle_mutating(req).await.map(Some),
        }
    }

    async fn handle_read(&self, req: &Request) -> Result<Response, Error> {
        if let Some(cached) = self.ctx.store.matches(&self.ctx.cache_store_name, req).await? {
            let age = match self.ctx.age_table.read::<AgeEntry>(&req.url).await {
                Ok(entry) => Some(entry.ts),
                Err(Error::NotFound(_)) => None,
                Err(e) => {
                    warn!(url = %req.url, error = %e, "age table unreadable, treating entry as expired");
                    None
                }
            };
            let now = self.ctx.clock.now_ms();
            if let Some(ts) = age {
                if now.saturating_sub(ts) <= self.ctx.config.max_age_ms {
                    let mut lru = self.lru.lock().await;
                    lru.state.accessed(&req.url);
                    lru.persist().await?;
                    return Ok(cached);
                }
            }
            self.evict(&req.url).await?;
        }
        self.fetch_and_cache(req).await
    }

    async fn evict(&self, url: &str) -> Result<(), Error> {
        self.purge_cache_entries(url).await?;
        let mut lru = self.lru.lock().await;
        lru.state.remove(url);
        lru.persist().await
    }

    async fn purge_cache_entries(&self, url: &str) -> Result<(), Error> {
        self.ctx.store.delete(&self.ctx.cache_store_name, &Request::get(url)).await?;
        self.ctx
            .store
            .delete(&self.ctx.cache_store_name, &Request::with_method(url, Method::Head))
            .await?;
        self.ctx.age_table.delete(url).await?;
        Ok(())
    }

    /// Mutating methods (anything but GET/HEAD/OPTIONS) purge whatever
    /// is cached for the URL and forward unchanged; their responses are
    /// never cached.
    async fn handle_mutating(&self, req: &Request) -> Result<Response, Error> {
        self.evict(&req.url).await?;
        self.ctx.transport.fetch(req).await.map_err(|e| Error::Network(e.to_string()))
    }

    /// Issues the network fetch for a cache miss (or expired entry). If
    /// `timeoutMs` is set, races it against a timer: a timer-win yields
    /// a synthetic 504 while the real fetch keeps running in a detached
    /// task that still populates the cache once it resolves.
    async fn fetch_and_cache(&self, req: &Request) -> Result<Response, Error> {
        let Some(timeout_ms) = self.ctx.config.timeout_ms else {
            let resp = self.ctx.transport.fetch(req).await.map_err(|e| Error::Network(e.to_string()))?;
            self.cache_response(req, &resp).await?;
            return Ok(resp);
        };

        let (tx, mut rx) = oneshot::channel();
        let transport = Arc::clone(&self.ctx.transport);
        let req_for_task = req.clone();
        tokio::spawn(async move {
            let result = transport.fetch(&req_for_task).await;
            let _ = tx.send(result);
        });

        tokio::select! {
            recv = &mut rx => {
                match recv {
                    Ok(Ok(resp)) => {
                        self.cache_response(req, &resp).await?;
                        Ok(resp)
                    }
                    Ok(Err(e)) => Err(Error::Network(e.to_string())),
                    Err(_) => Err(Error::Internal("data group fetch task was dropped".into())),
                }
            }
            _ = self.ctx.timer.sleep(timeout_ms) => {
                self.spawn_background_cache(req.clone(), rx);
                Ok(Response::gateway_timeout())
            }
        }
    }

    /// Continues the race-lost fetch under a detached task (the
    /// `waitUntil`-extended background work the design doc calls for),
    /// so the cache still ends up populated for the next caller even
    /// though this one already got a synthetic 504.
    fn spawn_background_cache(&self, req: Request, rx: oneshot::Receiver<anyhow::Result<Response>>) {
        let store = Arc::clone(&self.ctx.store);
        let cache_store_name = self.ctx.cache_store_name.clone();
        let age_table = self.ctx.age_table.clone();
        let clock = Arc::clone(&self.ctx.clock);
        let lru = Arc::clone(&self.lru);
        let max_size = self.ctx.config.max_size;
        tokio::spawn(async move {
            let Ok(Ok(resp)) = rx.await else {
                return;
            };
            if !resp.ok() {
                return;
            }
            if let Err(e) = store
                .put(&cache_store_name, StoredEntry { request: req.clone(), response: resp })
                .await
            {
                warn!(url = %req.url, error = %e, "timed-out fetch failed to populate cache");
                return;
            }
            if age_table.write(&req.url, &AgeEntry { ts: clock.now_ms() }).await.is_err() {
                return;
            }
            let mut guard = lru.lock().await;
            guard.state.accessed(&req.url);
            while guard.state.size() as u64 > max_size {
                match guard.state.pop() {
                    Some(evicted) => {
                        let _ = store.delete(&cache_store_name, &Request::get(&evicted)).await;
                        let _ = store.delete(&cache_store_name, &Request::with_method(&evicted, Method::Head)).await;
                        let _ = age_table.delete(&evicted).await;
                    }
                    None => break,
                }
            }
            let _ = guard.persist().await;
        });
    }

    async fn cache_response(&self, req: &Request, resp: &Response) -> Result<(), Error> {
        if !resp.ok() {
            return Ok(());
        }
        {
            let mut guard = self.lru.lock().await;
            if guard.state.size() as u64 >= self.ctx.config.max_size && !guard.state.contains(&req.url) {
                if let Some(evicted) = guard.state.pop() {
                    self.purge_cache_entries(&evicted).await?;
                }
            }
        }
        self.ctx
            .store
            .put(&self.ctx.cache_store_name, StoredEntry { request: req.clone(), response: resp.clone() })
            .await?;
        self.ctx.age_table.write(&req.url, &AgeEntry { ts: self.ctx.clock.now_ms() }).await?;
        let mut guard = self.lru.lock().await;
        guard.state.accessed(&req.url);
        guard.persist().await
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::http::{Request, Response};
use crate::manifest::{AssetGroupConfig, AssetGroupMode};
use crate::runtime::{Clock, NetworkTransport, Random, ResponseStore};
use crate::scheduler::IdleScheduler;
use crate::singleflight::SingleFlight;
use crate::store::{Db, Table};

/// The only legitimate cross-version API: a prior app version offered
/// to a newly-installing one as a source of already-cached,
/// hash-identical (or, for unhashed URLs, pattern-identical) resources.
/// Deliberately narrow and read-only.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Option<Response>;
    async fn previously_cached_unhashed(&self, patterns: &[Regex]) -> Vec<UnhashedCarryOver>;
}

pub struct UnhashedCarryOver {
    pub url: String,
    pub response: Response,
    pub metadata_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaEntry {
    ts: i64,
}

/// Everything one asset group needs that isn't its own config: the
/// collaborators, the compiled patterns, and the backing named stores.
pub struct AssetGroupContext {
    pub config: AssetGroupConfig,
    pub hash_table: Arc<HashMap<String, String>>,
    pub cache_store_name: String,
    pub meta_table: Table,
    pub store: Arc<dyn ResponseStore>,
    pub transport: Arc<dyn NetworkTransport>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn Random>,
    pub scheduler: Arc<IdleScheduler>,
    pub cache_bust_key: String,
    pub patterns: Vec<Regex>,
    pub update_from: Option<Arc<dyn UpdateSource>>,
}

impl AssetGroupContext {
    pub fn new(
        db: &Db,
        manifest_hash: &str,
        config: AssetGroupConfig,
        hash_table: Arc<HashMap<String, String>>,
        store: Arc<dyn ResponseStore>,
        transport: Arc<dyn NetworkTransport>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn Random>,
        scheduler: Arc<IdleScheduler>,
        cache_bust_key: String,
        update_from: Option<Arc<dyn UpdateSource>>,
    ) -> Result<Self, Error> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Internal(format!("bad pattern {p:?}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let meta_table = db.open(&format!("{manifest_hash}:assets:{}:meta", config.name));
        Ok(Self {
            cache_store_name: format!("{manifest_hash}:assets:{}:cache", config.name),
            meta_table,
            config,
            hash_table,
            store,
            transport,
            clock,
            random,
            scheduler,
            cache_bust_key,
            patterns,
            update_from,
        })
    }

    fn is_hashed(&self, url: &str) -> bool {
        self.hash_table.contains_key(url)
    }

    fn matches(&self, url: &str) -> bool {
        self.config.urls.iter().any(|u| u == url) || self.patterns.iter().any(|p| p.is_match(url))
    }
}

/// A versioned static-asset cache. Prefetch and lazy groups share every
/// runtime behavior and differ only in `initialize_fully`, so this is
/// one type tagged by `config.mode` rather than two class hierarchies.
pub struct AssetGroup {
    ctx: AssetGroupContext,
    in_flight: SingleFlight<Response, Error>,
}

impl AssetGroup {
    pub fn new(ctx: AssetGroupContext) -> Self {
        Self {
            ctx,
            in_flight: SingleFlight::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.ctx.config.name
    }

    pub fn matches_request(&self, req: &Request) -> bool {
        self.ctx.matches(&req.url)
    }

    /// Serves a matched request per the design doc's three-step policy:
    /// hash-pinned hit, unhashed hit (with stale-while-revalidate), or
    /// miss (dedup-fetch-and-cache).
    pub async fn handle(&self, req: &Request) -> Result<Option<Response>, Error> {
        if !self.matches_request(req) {
            return Ok(None);
        }

        let cached = self.ctx.store.matches(&self.ctx.cache_store_name, req).await?;
        if let Some(resp) = cached {
            if self.ctx.is_hashed(&req.url) {
                return Ok(Some(resp));
            }
            if self.is_stale(&req.url, &resp).await? {
                self.schedule_revalidation(req.clone()).await;
                return Ok(Some(resp));
            }
            return Ok(Some(resp));
        }

        let resp = self.fetch_and_cache_once(req).await?;
        Ok(Some(resp))
    }

    async fn is_stale(&self, url: &str, resp: &Response) -> Result<bool, Error> {
        let now = self.ctx.clock.now_ms();
        if let Some(cc) = resp.header("cache-control") {
            if let Some(max_age_secs) = parse_max_age(cc) {
                let origin = match self.ctx.meta_table.read::<MetaEntry>(url).await {
                    Ok(m) => Some(m.ts),
                    Err(Error::NotFound(_)) => resp.header("date").and_then(parse_http_date),
                    Err(e) => {
                        warn!(url = %url, error = %e, "freshness metadata unreadable, treating as stale");
                        return Ok(true);
                    }
                };
                return Ok(match origin {
                    Some(origin) => now.saturating_sub(origin) > max_age_secs * 1000,
                    None => true,
                });
            }
        }
        if let Some(expires) = resp.header("expires").and_then(parse_http_date) {
            return Ok(now > expires);
        }
        Ok(true)
    }

    async fn schedule_revalidation(&self, req: Request) {
        let store = Arc::clone(&self.ctx.store);
        let cache_store_name = self.ctx.cache_store_name.clone();
        let transport = Arc::clone(&self.ctx.transport);
        let meta_table_key = req.url.clone();
        let meta_table = self.ctx.meta_table.clone();
        let clock = Arc::clone(&self.ctx.clock);
        let group = self.ctx.config.name.clone();
        self.ctx.scheduler.schedule(async move {
            debug!(url = %req.url, group = %group, "revalidating stale unhashed asset");
            let fetched = match transport.fetch(&req).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %req.url, error = %e, "revalidation fetch failed");
                    return;
                }
            };
            if !fetched.ok() {
                warn!(url = %req.url, status = fetched.status, "revalidation returned non-OK");
                return;
            }
            if let Err(e) = store
                .put(
                    &cache_store_name,
                    crate::runtime::StoredEntry {
                        request: req,
                        response: fetched,
                    },
                )
                .await
            {
                warn!(error = %e, "failed to write revalidated asset");
                return;
            }
            let _ = meta_table
                .write(&meta_table_key, &MetaEntry { ts: clock.now_ms() })
                .await;
        })
        .await;
    }

    /// Deduplicated fetch-and-cache for a single URL. Hashed URLs are
    /// content-verified (with one cache-busted retry on mismatch);
    /// unhashed URLs simply record the fetch time in the metadata
    /// table.
    async fn fetch_and_cache_once(&self, req: &Request) -> Result<Response, Error> {
        let (result, was_executor) = self
            .in_flight
            .join_or_execute(&req.url, || self.do_fetch_and_cache(req.clone()))
            .await;
        let _ = was_executor;
        result
    }

    async fn do_fetch_and_cache(&self, req: Request) -> Result<Response, Error> {
        if let Some(hash) = self.ctx.hash_table.get(&req.url).cloned() {
            if let Some(source) = &self.ctx.update_from {
                if let Some(resp) = source.lookup_resource_with_hash(&req.url, &hash).await {
                    self.ctx
                        .store
                        .put(
                            &self.ctx.cache_store_name,
                            crate::runtime::StoredEntry {
                                request: req.clone(),
                                response: resp.clone(),
                            },
                        )
                        .await?;
                    return Ok(resp);
                }
            }
            self.fetch_hashed(&req, &hash).await
        } else {
            self.fetch_unhashed(&req).await
        }
    }

    async fn fetch_hashed(&self, req: &Request, expected_hash: &str) -> Result<Response, Error> {
        let first = self.ctx.transport.fetch(req).await.map_err(|e| Error::Network(e.to_string()))?;
        if !first.ok() {
            return Err(Error::NonOkResponse(req.url.clone()));
        }
        let mut hasher = Sha1::new();
        hasher.update(&first.body);
        let actual = hex::encode(hasher.finalize());
        if actual == expected_hash {
            self.ctx
                .store
                .put(
                    &self.ctx.cache_store_name,
                    crate::runtime::StoredEntry {
                        request: req.clone(),
                        response: first.clone(),
                    },
                )
                .await?;
            return Ok(first);
        }

        warn!(url = %req.url, "hash mismatch on first attempt, retrying with cache-bust");
        let busted_url = append_cache_bust(&req.url, &self.ctx.cache_bust_key, &self.ctx.random.cache_bust_token());
        let busted_req = Request::get(busted_url);
        let second = self
            .ctx
            .transport
            .fetch(&busted_req)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if !second.ok() {
            return Err(Error::NonOkResponse(req.url.clone()));
        }
        let mut hasher2 = Sha1::new();
        hasher2.update(&second.body);
        let actual2 = hex::encode(hasher2.finalize());
        if actual2 == expected_hash {
            self.ctx
                .store
                .put(
                    &self.ctx.cache_store_name,
                    crate::runtime::StoredEntry {
                        request: req.clone(),
                        response: second.clone(),
                    },
                )
                .await?;
            return Ok(second);
        }

        Err(Error::HashMismatch {
            url: req.url.clone(),
            expected: expected_hash.to_string(),
            actual: actual2,
        })
    }

    async fn fetch_unhashed(&self, req: &Request) -> Result<Response, Error> {
        if let Some(source) = &self.ctx.update_from {
            let matches = source.previously_cached_unhashed(&self.ctx.patterns).await;
            if let Some(carry) = matches.into_iter().find(|c| c.url == req.url) {
                self.ctx
                    .store
                    .put(
                        &self.ctx.cache_store_name,
                        crate::runtime::StoredEntry {
                            request: req.clone(),
                            response: carry.response.clone(),
                        },
                    )
                    .await?;
                self.ctx
                    .meta_table
                    .write(&req.url, &MetaEntry { ts: carry.metadata_ts })
                    .await?;
                return Ok(carry.response);
            }
        }

        let resp = self.ctx.transport.fetch(req).await.map_err(|e| Error::Network(e.to_string()))?;
        if !resp.ok() {
            return Err(Error::NonOkResponse(req.url.clone()));
        }
        self.ctx
            .store
            .put(
                &self.ctx.cache_store_name,
                crate::runtime::StoredEntry {
                    request: req.clone(),
                    response: resp.clone(),
                },
            )
            .await?;
        self.ctx
            .meta_table
            .write(&req.url, &MetaEntry { ts: self.ctx.clock.now_ms() })
            .await?;
        Ok(resp)
    }

    /// Serial, ordered initialization per the design doc: prefetch
    /// groups actually fetch their listed URLs; lazy groups only do a
    /// best-effort update cross-copy.
    pub async fn initialize_fully(&self) -> Result<(), Error> {
        match self.ctx.config.mode {
            AssetGroupMode::Prefetch => self.initialize_prefetch().await,
            AssetGroupMode::Lazy => {
                self.initialize_lazy().await;
                Ok(())
            }
        }
    }

    async fn initialize_prefetch(&self) -> Result<(), Error> {
        let urls = self.ctx.config.urls.clone();
        for url in urls {
            let req = Request::get(url.clone());
            let already_cached = self.ctx.store.matches(&self.ctx.cache_store_name, &req).await?;
            if already_cached.is_some() {
                continue;
            }
            info!(url = %url, group = %self.name(), "prefetching asset");
            self.fetch_and_cache_once(&req).await?;
        }

        if let Some(source) = &self.ctx.update_from {
            for carry in source.previously_cached_unhashed(&self.ctx.patterns).await {
                let req = Request::get(carry.url.clone());
                if self.ctx.store.matches(&self.ctx.cache_store_name, &req).await?.is_some() {
                    continue;
                }
                self.ctx
                    .store
                    .put(
                        &self.ctx.cache_store_name,
                        crate::runtime::StoredEntry {
                            request: req.clone(),
                            response: carry.response,
                        },
                    )
                    .await?;
                self.ctx
                    .meta_table
                    .write(&carry.url, &MetaEntry { ts: carry.metadata_ts })
                    .await?;
            }
        }
        Ok(())
    }

    async fn initialize_lazy(&self) {
        let Some(source) = &self.ctx.update_from else {
            return;
        };
        for hashed_url in self.ctx.config.urls.clone() {
            if let Some(hash) = self.ctx.hash_table.get(&hashed_url).cloned() {
                if let Some(resp) = source.lookup_resource_with_hash(&hashed_url, &hash).await {
                    let req = Request::get(hashed_url.clone());
                    if let Err(e) = self
                        .ctx
                        .store
                        .put(
                            &self.ctx.cache_store_name,
                            crate::runtime::StoredEntry { request: req, response: resp },
                        )
                        .await
                    {
                        warn!(url = %hashed_url, error = %e, "lazy cross-copy failed, ignoring");
                    }
                }
            }
        }
        for carry in source.previously_cached_unhashed(&self.ctx.patterns).await {
            let req = Request::get(carry.url.clone());
            if let Err(e) = self
                .ctx
                .store
                .put(
                    &self.ctx.cache_store_name,
                    crate::runtime::StoredEntry { request: req, response: carry.response },
                )
                .await
            {
                warn!(url = %carry.url, error = %e, "lazy cross-copy failed, ignoring");
                continue;
            }
            let _ = self
                .ctx
                .meta_table
                .write(&carry.url, &MetaEntry { ts: carry.metadata_ts })
                .await;
        }
    }

    /// Returns a response only if this group's own mapping agrees with
    /// `hash`; used by [`UpdateSource::lookup_resource_with_hash`].
    pub async fn lookup_with_hash(&self, url: &str, hash: &str) -> Option<Response> {
        if self.ctx.hash_table.get(url).map(String::as_str) != Some(hash) {
            return None;
        }
        self.ctx
            .store
            .matches(&self.ctx.cache_store_name, &Request::get(url))
            .await
            .ok()
            .flatten()
    }

    pub async fn previously_cached_unhashed(&self, patterns: &[Regex]) -> Vec<UnhashedCarryOver> {
        let mut out = Vec::new();
        let Ok(keys) = self.ctx.meta_table.keys().await else {
            return out;
        };
        for url in keys {
            if !patterns.iter().any(|p| p.is_match(&url)) {
                continue;
            }
            if self.ctx.is_hashed(&url) {
                continue;
            }
            let Ok(Some(resp)) = self
                .ctx
                .store
                .matches(&self.ctx.cache_store_name, &Request::get(&url))
                .await
            else {
                continue;
            };
            let ts = self
                .ctx
                .meta_table
                .read::<MetaEntry>(&url)
                .await
                .map(|m| m.ts)
                .unwrap_or(0);
            out.push(UnhashedCarryOver { url, response: resp, metadata_ts: ts });
        }
        out
    }
}

fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|part| {
        let part = part.trim();
        let rest = part.strip_prefix("max-age=")?;
        rest.trim().parse::<i64>().ok()
    })
}

fn parse_http_date(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub(crate) fn append_cache_bust(url: &str, key: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{key}={}", urlencoding::encode(token))
}

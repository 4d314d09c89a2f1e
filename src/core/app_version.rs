use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::asset_group::{AssetGroup, AssetGroupContext, UnhashedCarryOver, UpdateSource};
use crate::data_group::{DataGroup, DataGroupContext};
use crate::errors::Error;
use crate::http::Request;
use crate::http::Response;
use crate::manifest::{Manifest, ManifestHash};
use crate::runtime::{Clock, NetworkTransport, Random, ResponseStore, Timer};
use crate::scheduler::IdleScheduler;
use crate::store::Db;

/// The runtime binding of one manifest: its hash, its asset groups, its
/// data groups, and an `okay` flag that flips false the moment
/// initialization of any asset group fails. Identity is the
/// [`ManifestHash`]; ownership of every backing table is namespaced
/// under that hash, per the design doc's ownership note.
pub struct AppVersion {
    hash: ManifestHash,
    asset_groups: Vec<AssetGroup>,
    data_groups: Vec<DataGroup>,
    okay: std::sync::atomic::AtomicBool,
}

/// Everything needed to build every [`AssetGroup`]/[`DataGroup`] in one
/// manifest: the shared runtime collaborators, threaded through once at
/// construction time rather than stored per-group.
pub struct AppVersionDeps {
    pub db: Db,
    pub store: Arc<dyn ResponseStore>,
    pub transport: Arc<dyn NetworkTransport>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn Random>,
    pub timer: Arc<dyn Timer>,
    pub scheduler: Arc<IdleScheduler>,
    pub cache_bust_key: String,
}

impl AppVersion {
    /// Flattens `manifest.hash_table` and constructs one asset/data
    /// group per config entry, in declaration order. `update_from` is
    /// the previous `latest` version, offered as a resource-reuse
    /// source to every asset group.
    pub async fn construct(
        manifest: &Manifest,
        deps: &AppVersionDeps,
        update_from: Option<Arc<dyn UpdateSource>>,
    ) -> Result<Self, Error> {
        let hash = ManifestHash::of(manifest)?;
        let hash_table = Arc::new(manifest.hash_table.clone());

        let mut asset_groups = Vec::with_capacity(manifest.asset_groups.len());
        for config in &manifest.asset_groups {
            let ctx = AssetGroupContext::new(
                &deps.db,
                hash.as_str(),
                config.clone(),
                Arc::clone(&hash_table),
                Arc::clone(&deps.store),
                Arc::clone(&deps.transport),
                Arc::clone(&deps.clock),
                Arc::clone(&deps.random),
                Arc::clone(&deps.scheduler),
                deps.cache_bust_key.clone(),
                update_from.clone(),
            )?;
            asset_groups.push(AssetGroup::new(ctx));
        }

        let mut data_groups = Vec::with_capacity(manifest.data_groups.len());
        for config in &manifest.data_groups {
            let ctx = DataGroupContext::new(
                &deps.db,
                hash.as_str(),
                config.clone(),
                Arc::clone(&deps.store),
                Arc::clone(&deps.transport),
                Arc::clone(&deps.clock),
                Arc::clone(&deps.timer),
            )?;
            data_groups.push(DataGroup::load(ctx, &deps.db, hash.as_str()).await?);
        }

        Ok(Self {
            hash,
            asset_groups,
            data_groups,
            okay: std::sync::atomic::AtomicBool::new(true),
        })
    }

    pub fn hash(&self) -> &ManifestHash {
        &self.hash
    }

    pub fn is_okay(&self) -> bool {
        self.okay.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Asset groups initialize serially in declaration order; the first
    /// failure aborts the chain and marks this version broken.
    pub async fn initialize_fully(&self) -> Result<(), Error> {
        for group in &self.asset_groups {
            if let Err(e) = group.initialize_fully().await {
                self.okay.store(false, std::sync::atomic::Ordering::SeqCst);
                warn!(hash = %self.hash, group = group.name(), error = %e, "asset group initialization failed");
                return Err(e);
            }
        }
        info!(hash = %self.hash, "app version initialized");
        Ok(())
    }

    /// Asset groups first, in order; the first non-`None` response
    /// wins. Falls through to data groups identically. Abstention
    /// everywhere returns `None`.
    pub async fn handle_fetch(&self, req: &Request) -> Result<Option<Response>, Error> {
        for group in &self.asset_groups {
            if let Some(resp) = group.handle(req).await? {
                return Ok(Some(resp));
            }
        }
        for group in &self.data_groups {
            if let Some(resp) = group.handle(req).await? {
                return Ok(Some(resp));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl UpdateSource for AppVersion {
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Option<Response> {
        for group in &self.asset_groups {
            if let Some(resp) = group.lookup_with_hash(url, hash).await {
                return Some(resp);
            }
        }
        None
    }

    async fn previously_cached_unhashed(&self, patterns: &[Regex]) -> Vec<UnhashedCarryOver> {
        let mut out = Vec::new();
        for group in &self.asset_groups {
            out.extend(group.previously_cached_unhashed(patterns).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AssetGroupConfig, AssetGroupMode, DataGroupConfig};
    use crate::runtime::testkit::{FakeClock, FakeTimer, SequentialRandom};
    use crate::runtime::InMemoryResponseStore;
    use std::collections::HashMap as StdHashMap;

    fn manifest() -> Manifest {
        Manifest {
            config_version: 1,
            app_data: None,
            asset_groups: vec![AssetGroupConfig {
                name: "app".into(),
                mode: AssetGroupMode::Prefetch,
                urls: vec!["/index.html".into()],
                patterns: vec![],
            }],
            data_groups: vec![DataGroupConfig {
                name: "api".into(),
                patterns: vec!["^/api/.*".into()],
                max_size: 10,
                max_age_ms: 60_000,
                timeout_ms: None,
            }],
            hash_table: StdHashMap::from([("/index.html".to_string(), {
                use sha1::{Digest, Sha1};
                let mut h = Sha1::new();
                h.update(b"hello");
                hex::encode(h.finalize())
            })]),
        }
    }

    fn deps(store: Arc<dyn ResponseStore>, transport: Arc<dyn NetworkTransport>) -> AppVersionDeps {
        AppVersionDeps {
            db: Db::new(Arc::clone(&store)),
            store,
            transport,
            clock: Arc::new(FakeClock::new(0)),
            random: Arc::new(SequentialRandom::default()),
            timer: Arc::new(FakeTimer),
            scheduler: Arc::new(IdleScheduler::new(Arc::new(FakeTimer), 10)),
            cache_bust_key: "ngsw-cache-bust".into(),
        }
    }

    #[tokio::test]
    async fn construct_and_initialize_prefetches_hashed_asset() {
        let store: Arc<dyn ResponseStore> = Arc::new(InMemoryResponseStore::new());
        let transport = Arc::new(crate::runtime::testkit::FakeTransport::new());
        transport.set("/index.html", Response::new(200, b"hello".to_vec())).await;
        let deps = deps(store, transport);

        let version = AppVersion::construct(&manifest(), &deps, None).await.unwrap();
        version.initialize_fully().await.unwrap();
        assert!(version.is_okay());

        let resp = version.handle_fetch(&Request::get("/index.html")).await.unwrap();
        assert_eq!(resp.unwrap().body, b"hello");
    }

    #[tokio::test]
    async fn initialization_failure_marks_version_not_okay() {
        let store: Arc<dyn ResponseStore> = Arc::new(InMemoryResponseStore::new());
        let transport = Arc::new(crate::runtime::testkit::FakeTransport::new());
        // no route registered for /index.html -> fetch fails
        let deps = deps(store, transport);

        let version = AppVersion::construct(&manifest(), &deps, None).await.unwrap();
        assert!(version.initialize_fully().await.is_err());
        assert!(!version.is_okay());
    }

    #[tokio::test]
    async fn data_group_request_falls_through_after_asset_groups_abstain() {
        let store: Arc<dyn ResponseStore> = Arc::new(InMemoryResponseStore::new());
        let transport = Arc::new(crate::runtime::testkit::FakeTransport::new());
        transport.set("/index.html", Response::new(200, b"hello".to_vec())).await;
        transport.set("/api/items", Response::new(200, b"[]".to_vec())).await;
        let deps = deps(store, transport);

        let version = AppVersion::construct(&manifest(), &deps, None).await.unwrap();
        version.initialize_fully().await.unwrap();

        let resp = version.handle_fetch(&Request::get("/api/items")).await.unwrap();
        assert_eq!(resp.unwrap().body, b"[]");
    }
}

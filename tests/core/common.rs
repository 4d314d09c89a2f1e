use std::sync::Arc;

use offline_proxy_core::runtime::testkit::{FakeClock, FakeTimer, FakeTransport, SequentialRandom};
use offline_proxy_core::runtime::{InMemoryResponseStore, ResponseStore};
use offline_proxy_core::{AppVersionDeps, Db, Driver, IdleScheduler, WorkerConfig};

pub fn sha1_hex(body: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut h = Sha1::new();
    h.update(body);
    hex::encode(h.finalize())
}

pub fn manifest_json(
    asset_groups: serde_json::Value,
    data_groups: serde_json::Value,
    hash_table: serde_json::Value,
) -> Vec<u8> {
    let m = serde_json::json!({
        "configVersion": 1,
        "assetGroups": asset_groups,
        "dataGroups": data_groups,
        "hashTable": hash_table,
    });
    serde_json::to_vec(&m).unwrap()
}

/// A fully-wired set of fakes sharing one backing [`ResponseStore`], so
/// a second [`Driver`] built from the same harness sees whatever the
/// first one persisted — the shape every restart-across-worker-lifetime
/// scenario needs.
pub struct Harness {
    pub store: Arc<dyn ResponseStore>,
    pub db: Db,
    pub transport: Arc<FakeTransport>,
    pub clock: Arc<FakeClock>,
    pub scheduler: Arc<IdleScheduler>,
    pub random: Arc<SequentialRandom>,
    pub cache_bust_key: String,
}

impl Harness {
    pub fn new() -> Self {
        let store: Arc<dyn ResponseStore> = Arc::new(InMemoryResponseStore::new());
        let db = Db::new(Arc::clone(&store));
        Self {
            store,
            db,
            transport: Arc::new(FakeTransport::new()),
            clock: Arc::new(FakeClock::new(0)),
            scheduler: Arc::new(IdleScheduler::new(Arc::new(FakeTimer), 10)),
            random: Arc::new(SequentialRandom::default()),
            cache_bust_key: "ngsw-cache-bust".to_string(),
        }
    }

    fn deps(&self) -> AppVersionDeps {
        AppVersionDeps {
            db: self.db.clone(),
            store: Arc::clone(&self.store),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            random: self.random.clone(),
            timer: Arc::new(FakeTimer),
            scheduler: Arc::clone(&self.scheduler),
            cache_bust_key: self.cache_bust_key.clone(),
        }
    }

    /// Builds a `Driver` against `origin_host = "localhost"`, so asset
    /// groups initialize inline on the first request instead of being
    /// deferred to the idle scheduler — the tests care about cache
    /// contents settling deterministically, not about the deferral
    /// policy itself.
    pub fn driver(&self) -> Driver {
        let config = WorkerConfig::default();
        Driver::new(self.db.clone(), "/ngsw.json", self.deps(), &config, "localhost")
    }

    /// A fresh `Driver` over the same persisted control/cache tables,
    /// standing in for a worker restart: new in-memory state, same
    /// backing store.
    pub fn restarted_driver(&self) -> Driver {
        self.driver()
    }
}

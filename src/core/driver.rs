use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::app_version::{AppVersion, AppVersionDeps};
use crate::asset_group::{append_cache_bust, UpdateSource};
use crate::config::WorkerConfig;
use crate::errors::Error;
use crate::http::{Request, Response};
use crate::manifest::{Manifest, ManifestHash};
use crate::runtime::ClientId;
use crate::store::{Db, Table};

/// The three-valued readiness state machine. There is no automatic
/// reverse transition out of [`ReadyState::SafeMode`]; it persists
/// until the worker restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Normal,
    ExistingClientsOnly,
    SafeMode,
}

struct DriverState {
    initialized: bool,
    ready: ReadyState,
    manifests: HashMap<String, Manifest>,
    versions: HashMap<String, Arc<AppVersion>>,
    assignments: HashMap<ClientId, String>,
    latest: Option<String>,
    last_update_check_ms: i64,
}

impl DriverState {
    fn fresh() -> Self {
        Self {
            initialized: false,
            ready: ReadyState::Normal,
            manifests: HashMap::new(),
            versions: HashMap::new(),
            assignments: HashMap::new(),
            latest: None,
            last_update_check_ms: 0,
        }
    }
}

struct ControlSnapshot {
    manifests: HashMap<String, Manifest>,
    assignments: HashMap<String, String>,
    latest: String,
}

/// One-shot-initialized, process-wide singleton binding one or more
/// [`AppVersion`]s to incoming requests. Owns the `control` table
/// exclusively; every other table is owned by the app version that
/// created it.
pub struct Driver {
    control: Table,
    manifest_url: String,
    deps: AppVersionDeps,
    localhost: bool,
    update_check_interval_ms: u64,
    state: Mutex<DriverState>,
}

impl Driver {
    pub fn new(db: Db, manifest_url: impl Into<String>, deps: AppVersionDeps, config: &WorkerConfig, origin_host: &str) -> Self {
        Self {
            control: db.open("control"),
            manifest_url: manifest_url.into(),
            deps,
            localhost: config.is_localhost(origin_host),
            update_check_interval_ms: config.update_check_interval_ms,
            state: Mutex::new(DriverState::fresh()),
        }
    }

    pub async fn ready_state(&self) -> ReadyState {
        self.state.lock().await.ready
    }

    /// Idempotent. The first caller performs initialization (reading
    /// `control`, or bootstrapping it from a fresh manifest fetch on
    /// any read failure); later callers observe the already-settled
    /// state. Any failure here is fatal and flips [`ReadyState::SafeMode`].
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }
        match self.initialize_locked(&mut state).await {
            Ok(()) => {
                state.initialized = true;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "driver initialization failed, entering SAFE_MODE");
                state.initialized = true;
                state.ready = ReadyState::SafeMode;
                Err(e)
            }
        }
    }

    async fn initialize_locked(&self, state: &mut DriverState) -> Result<(), Error> {
        let loaded = self.read_control().await;
        let (manifests, assignments, latest) = match loaded {
            Some(triple) => triple,
            None => self.bootstrap_control().await?,
        };

        if !manifests.contains_key(&latest) {
            return Err(Error::InvariantViolated("latest hash is not present in manifests".into()));
        }

        let mut versions = HashMap::with_capacity(manifests.len());
        for (hash, manifest) in &manifests {
            let version = AppVersion::construct(manifest, &self.deps, None).await?;
            let version = Arc::new(version);
            if self.localhost {
                if let Err(e) = version.initialize_fully().await {
                    warn!(hash = %hash, error = %e, "localhost inline initialization failed");
                }
            } else {
                let v = Arc::clone(&version);
                let h = hash.clone();
                self.deps
                    .scheduler
                    .schedule(async move {
                        if let Err(e) = v.initialize_fully().await {
                            warn!(hash = %h, error = %e, "background asset group initialization failed");
                        }
                    })
                    .await;
            }
            versions.insert(hash.clone(), version);
        }
        self.deps.scheduler.trigger().await;

        state.manifests = manifests;
        state.versions = versions;
        state.assignments = assignments.into_iter().map(|(c, h)| (ClientId::new(c), h)).collect();
        state.latest = Some(latest);
        state.ready = ReadyState::Normal;
        state.last_update_check_ms = self.deps.clock.now_ms();
        info!(versions = state.versions.len(), "driver initialized");
        Ok(())
    }

    async fn read_control(&self) -> Option<(HashMap<String, Manifest>, HashMap<String, String>, String)> {
        let manifests = self.control.read::<HashMap<String, Manifest>>("manifests").await.ok()?;
        let assignments = self.control.read::<HashMap<String, String>>("assignments").await.ok()?;
        let latest = self.control.read::<String>("latest").await.ok()?;
        Some((manifests, assignments, latest))
    }

    async fn bootstrap_control(&self) -> Result<(HashMap<String, Manifest>, HashMap<String, String>, String), Error> {
        let manifest = self.fetch_manifest().await?;
        let hash = ManifestHash::of(&manifest)?.as_str().to_string();
        let manifests = HashMap::from([(hash.clone(), manifest)]);
        let assignments = HashMap::new();
        self.control.write("manifests", &manifests).await?;
        self.control.write("assignments", &assignments).await?;
        self.control.write("latest", &hash).await?;
        Ok((manifests, assignments, hash))
    }

    async fn fetch_manifest(&self) -> Result<Manifest, Error> {
        let bust = self.deps.random.cache_bust_token();
        let url = append_cache_bust(&self.manifest_url, &self.deps.cache_bust_key, &bust);
        let resp = self
            .deps
            .transport
            .fetch(&Request::get(url))
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;
        if !resp.ok() {
            return Err(Error::ManifestFetch(format!("manifest fetch returned status {}", resp.status)));
        }
        let manifest: Manifest =
            serde_json::from_slice(&resp.body).map_err(|e| Error::ManifestDecode(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn snapshot(state: &DriverState) -> ControlSnapshot {
        ControlSnapshot {
            manifests: state.manifests.clone(),
            assignments: state.assignments.iter().map(|(c, h)| (c.0.clone(), h.clone())).collect(),
            latest: state.latest.clone().unwrap_or_default(),
        }
    }

    async fn write_control(&self, snap: ControlSnapshot) -> Result<(), Error> {
        self.control.write("manifests", &snap.manifests).await?;
        self.control.write("assignments", &snap.assignments).await?;
        self.control.write("latest", &snap.latest).await?;
        Ok(())
    }

    /// Resolves the version a request should be served from, per the
    /// four-branch assignment policy. A `None` client is a navigation
    /// preload; pinning only ever happens for a known client.
    async fn resolve_version_hash(&self, client: &Option<ClientId>) -> Option<String> {
        let (ready, existing, latest) = {
            let state = self.state.lock().await;
            (
                state.ready,
                client.as_ref().and_then(|c| state.assignments.get(c).cloned()),
                state.latest.clone(),
            )
        };
        if let Some(hash) = existing {
            return Some(hash);
        }
        match client {
            Some(c) => {
                if ready != ReadyState::Normal {
                    return None;
                }
                let hash = latest?;
                self.pin_client(c.clone(), hash.clone()).await;
                Some(hash)
            }
            None => {
                if ready == ReadyState::Normal {
                    latest
                } else {
                    None
                }
            }
        }
    }

    async fn pin_client(&self, client: ClientId, hash: String) {
        let snap = {
            let mut state = self.state.lock().await;
            state.assignments.insert(client, hash);
            Self::snapshot(&state)
        };
        if let Err(e) = self.write_control(snap).await {
            warn!(error = %e, "failed to persist client assignment");
        }
    }

    /// Handles one intercepted request. Never returns `Err` to the
    /// caller — any failure during initialization or dispatch is
    /// logged and treated as a network fall-through, matching the
    /// design doc's "driver never throws out of the fetch interceptor".
    pub async fn handle_fetch(&self, client: Option<ClientId>, req: &Request) -> Option<Response> {
        if self.ensure_initialized().await.is_err() {
            return None;
        }
        if self.ready_state().await == ReadyState::SafeMode {
            return None;
        }
        let hash = self.resolve_version_hash(&client).await?;
        let version = {
            let state = self.state.lock().await;
            state.versions.get(&hash).cloned()
        }?;
        match version.handle_fetch(req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(hash = %hash, error = %e, "version failed handling a request");
                self.version_failed(&hash).await;
                None
            }
        }
    }

    /// `latest` failing drops the driver to `EXISTING_CLIENTS_ONLY` and
    /// clears every pin; any other version failing re-pins its clients
    /// to `latest`.
    async fn version_failed(&self, hash: &str) {
        let snap = {
            let mut state = self.state.lock().await;
            if state.latest.as_deref() == Some(hash) {
                state.ready = ReadyState::ExistingClientsOnly;
                state.assignments.clear();
                info!(hash, "latest version failed, dropping to EXISTING_CLIENTS_ONLY");
            } else if let Some(latest) = state.latest.clone() {
                let affected: Vec<ClientId> = state
                    .assignments
                    .iter()
                    .filter(|(_, h)| h.as_str() == hash)
                    .map(|(c, _)| c.clone())
                    .collect();
                for c in affected {
                    state.assignments.insert(c, latest.clone());
                }
                info!(hash, "non-latest version failed, re-pinned affected clients to latest");
            }
            Self::snapshot(&state)
        };
        let _ = self.write_control(snap).await;
    }

    /// Fetches the manifest with cache-busting, and if its hash is
    /// unseen, constructs and fully initializes a candidate version
    /// (offering the current `latest` as an update source), then
    /// promotes it to `latest`. A failed candidate leaves all prior
    /// state unchanged.
    pub async fn check_for_update(&self) -> Result<bool, Error> {
        self.ensure_initialized().await?;
        let manifest = self.fetch_manifest().await?;
        let hash = ManifestHash::of(&manifest)?.as_str().to_string();

        let already_known = { self.state.lock().await.versions.contains_key(&hash) };
        if already_known {
            return Ok(false);
        }

        let previous_latest: Option<Arc<AppVersion>> = {
            let state = self.state.lock().await;
            state.latest.as_ref().and_then(|h| state.versions.get(h).cloned())
        };
        let update_from: Option<Arc<dyn UpdateSource>> =
            previous_latest.map(|v| v as Arc<dyn UpdateSource>);

        let candidate = AppVersion::construct(&manifest, &self.deps, update_from).await?;
        candidate.initialize_fully().await?;
        let candidate = Arc::new(candidate);

        let snap = {
            let mut state = self.state.lock().await;
            state.manifests.insert(hash.clone(), manifest);
            state.versions.insert(hash.clone(), candidate);
            state.latest = Some(hash.clone());
            Self::snapshot(&state)
        };
        self.write_control(snap).await?;
        info!(hash = %hash, "update applied, now latest");
        Ok(true)
    }

    /// Opportunistic counterpart to [`Self::check_for_update`]: a host
    /// calls this from its own idle hook on every tick, and it is a
    /// no-op unless `update_check_interval_ms` has elapsed since the
    /// last check (the one `ensure_initialized` performed counts).
    /// Returns `None` when the interval hasn't elapsed yet.
    pub async fn maybe_check_for_update(&self) -> Option<Result<bool, Error>> {
        {
            let state = self.state.lock().await;
            if !state.initialized {
                return None;
            }
            let now = self.deps.clock.now_ms();
            if now.saturating_sub(state.last_update_check_ms) < self.update_check_interval_ms as i64 {
                return None;
            }
        }
        {
            let mut state = self.state.lock().await;
            state.last_update_check_ms = self.deps.clock.now_ms();
        }
        Some(self.check_for_update().await)
    }

    /// Folds a null-biased reduction over every known version,
    /// returning the first non-`None` match. Used by [`UpdateSource`]
    /// for cross-version resource reuse.
    pub async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Option<Response> {
        let versions: Vec<Arc<AppVersion>> = self.state.lock().await.versions.values().cloned().collect();
        for version in versions {
            if let Some(resp) = version.lookup_resource_with_hash(url, hash).await {
                return Some(resp);
            }
        }
        None
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Tunables the design doc leaves as named constants in the source.
/// Exposed as configuration rather than literals so an embedder can
/// tune them without forking the crate; defaults reproduce the
/// source's behavior exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Idle-scheduler debounce window, in milliseconds.
    pub idle_debounce_ms: u64,
    /// Opportunistic update-check cadence at idle, in milliseconds.
    pub update_check_interval_ms: u64,
    /// Literal query-string key used to cache-bust manifest/asset
    /// fetches.
    pub cache_bust_key: String,
    /// Scopes whose origin host matches one of these are treated as
    /// localhost for development: asset groups initialize inline
    /// instead of being deferred to the idle scheduler.
    pub localhost_hosts: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_debounce_ms: 1_000,
            update_check_interval_ms: 12_000,
            cache_bust_key: "ngsw-cache-bust".to_string(),
            localhost_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
        }
    }
}

impl WorkerConfig {
    pub fn is_localhost(&self, host: &str) -> bool {
        self.localhost_hosts.iter().any(|h| h == host)
    }
}

/// Loads/saves [`WorkerConfig`] as pretty JSON on disk, the same
/// round-trip shape as the teacher's `GlobalConfigManager`.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<WorkerConfig> {
        if !self.path.exists() {
            let default_config = WorkerConfig::default();
            self.save(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.path)
            .await
            .context("failed to read worker config file")?;
        let config: WorkerConfig =
            serde_json::from_str(&content).context("failed to parse worker config JSON")?;
        Ok(config)
    }

    pub async fn save(&self, config: &WorkerConfig) -> Result<()> {
        let content =
            serde_json::to_string_pretty(config).context("failed to serialize worker config")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create config directory")?;
        }
        fs::write(&self.path, content)
            .await
            .context("failed to write worker config file")?;
        Ok(())
    }
}

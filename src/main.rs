use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use offline_proxy_core::config::ConfigManager;
use offline_proxy_core::driver::Driver;
use offline_proxy_core::http::Request;
use offline_proxy_core::runtime::{ClientId, FileResponseStore, ReqwestTransport, ResponseStore, SystemClock, TokioTimer, UuidRandom};
use offline_proxy_core::scheduler::IdleScheduler;
use offline_proxy_core::store::Db;
use offline_proxy_core::AppVersionDeps;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("offline proxy core demo starting");

    let data_dir = std::env::current_dir()?.join("offline-proxy-data");
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_manager = ConfigManager::new(data_dir.join("config.json"));
    let config = config_manager.load().await?;
    info!(?config, "worker configuration loaded");

    let store: Arc<dyn ResponseStore> = Arc::new(FileResponseStore::open(data_dir.join("cache-store.json")).await?);
    let db = Db::new(Arc::clone(&store));

    let scheduler = Arc::new(IdleScheduler::new(Arc::new(TokioTimer), config.idle_debounce_ms));

    let deps = AppVersionDeps {
        db: db.clone(),
        store,
        transport: Arc::new(ReqwestTransport::new()),
        clock: Arc::new(SystemClock),
        random: Arc::new(UuidRandom),
        timer: Arc::new(TokioTimer),
        scheduler,
        cache_bust_key: config.cache_bust_key.clone(),
    };

    let manifest_url = std::env::var("OFFLINE_PROXY_MANIFEST_URL")
        .unwrap_or_else(|_| "https://example.invalid/ngsw.json".to_string());
    let origin_host = url::Url::parse(&manifest_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    let driver = Driver::new(db, manifest_url, deps, &config, &origin_host);

    info!("driving a sample navigation request through the proxy");
    let client = ClientId::new("demo-client");
    match driver.handle_fetch(Some(client), &Request::get("/index.html")).await {
        Some(resp) => info!(status = resp.status, bytes = resp.body.len(), "served from the proxy"),
        None => info!("proxy declined the request; caller should fall through to the network"),
    }

    info!("checking for a manifest update");
    match driver.check_for_update().await {
        Ok(true) => info!("a new version is now latest"),
        Ok(false) => info!("already on the latest version"),
        Err(e) => info!(error = %e, "update check failed"),
    }

    Ok(())
}

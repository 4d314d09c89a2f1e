//! Core of an offline-first HTTP caching proxy meant to run inside a
//! browser's service-worker sandbox. This crate is the decision engine
//! only — [`driver::Driver`] assigns incoming requests to app versions
//! and serves them from [`asset_group::AssetGroup`]/
//! [`data_group::DataGroup`] caches; everything that talks to the
//! network, a clock, or a storage engine is abstracted behind the
//! traits in [`runtime`] so an embedder supplies the concrete host.

pub mod app_version;
pub mod asset_group;
pub mod config;
pub mod data_group;
pub mod driver;
pub mod errors;
pub mod http;
pub mod lru;
pub mod manifest;
pub mod runtime;
pub mod scheduler;
pub mod singleflight;
pub mod store;

pub use app_version::{AppVersion, AppVersionDeps};
pub use config::{ConfigManager, WorkerConfig};
pub use driver::{Driver, ReadyState};
pub use errors::Error;
pub use http::{Method, Request, Response};
pub use manifest::{AssetGroupConfig, AssetGroupMode, DataGroupConfig, Manifest, ManifestHash};
pub use runtime::ClientId;
pub use scheduler::IdleScheduler;
pub use store::Db;

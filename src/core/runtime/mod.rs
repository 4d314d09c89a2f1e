//! The external collaborators the core consumes, per the design doc's
//! "runtime collaborators" section: a network transport, a
//! response-addressable store, a clock, a timer, and a source of
//! randomness for cache-bust tokens. The core is generic over these so
//! it never touches a concrete HTTP stack or storage engine directly.

mod file_store;
mod http_transport;
mod memory_store;
mod system;
pub mod testkit;

pub use file_store::FileResponseStore;
pub use http_transport::ReqwestTransport;
pub use memory_store::InMemoryResponseStore;
pub use system::{SystemClock, TokioTimer, UuidRandom};

use async_trait::async_trait;

use crate::http::{Request, Response};

/// Opaque client identity assigned by the host runtime per browsing
/// context. `None` represents a navigation preload with no client yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `fetch(req) -> Response`. Never throws for HTTP-level errors — a
/// non-2xx is a normal, successful `Response` — but may return `Err`
/// for a genuine network failure (DNS, connection refused, timeout at
/// the transport level).
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    async fn fetch(&self, req: &Request) -> anyhow::Result<Response>;
}

/// One entry in a response-addressable store: the persisted body plus
/// the request it was cached against (so the store doesn't need to
/// parse methods back out of a string key).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredEntry {
    pub request: Request,
    pub response: Response,
}

/// A named, response-addressable key/value store, modeling the host's
/// Cache Storage-like primitive: named stores, each mapping a request
/// (by method + URL) to a response. Responses are immutable after
/// `put`; a fresh `Response` clone is required wherever a cached value
/// is both returned and reused.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn put(&self, store: &str, entry: StoredEntry) -> anyhow::Result<()>;
    async fn matches(&self, store: &str, req: &Request) -> anyhow::Result<Option<Response>>;
    async fn delete(&self, store: &str, req: &Request) -> anyhow::Result<bool>;
    async fn keys(&self, store: &str) -> anyhow::Result<Vec<Request>>;
    async fn delete_store(&self, store: &str) -> anyhow::Result<()>;
    async fn store_names(&self) -> anyhow::Result<Vec<String>>;

    /// Raw JSON blob access, used by the persistence façade's named
    /// tables (`ngsw:db:<table>`). Kept on the same trait as the
    /// response bodies because the real host backs both with the same
    /// Cache Storage primitive (a JSON value becomes the body of a
    /// synthetic `/<key>` response).
    async fn put_value(&self, store: &str, key: &str, value: serde_json::Value) -> anyhow::Result<()>;
    async fn get_value(&self, store: &str, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
    async fn delete_value(&self, store: &str, key: &str) -> anyhow::Result<bool>;
    async fn value_keys(&self, store: &str) -> anyhow::Result<Vec<String>>;
}

/// A monotonically-non-decreasing millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// `timeout(ms) -> Promise`, mockable in tests.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, ms: u64);
}

/// Used only for cache-bust query-string values.
pub trait Random: Send + Sync {
    fn cache_bust_token(&self) -> String;
}

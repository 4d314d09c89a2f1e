use serde::Serialize;
use thiserror::Error;

/// Error kinds surfaced by the core, mirroring the disposition table in
/// the design doc's error-handling section. Every variant here is either
/// fatal to one app version, fatal to the whole driver, or purely
/// informational — never a panic.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum Error {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("manifest fetch failed: {0}")]
    ManifestFetch(String),

    #[error("manifest decode failed: {0}")]
    ManifestDecode(String),

    #[error("asset hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("non-OK response caching {0}")]
    NonOkResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<&'static str> for Error {
    fn from(msg: &'static str) -> Self {
        Error::Internal(msg.to_string())
    }
}

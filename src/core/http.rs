use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// HTTP method of an intercepted request. Only the methods the driver
/// and data groups branch on are named; anything else falls through
/// `Method::Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Options,
    Other,
}

impl Method {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            _ => Method::Other,
        }
    }

    pub fn is_cacheable_read(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// A request as seen by the core: just enough to route and cache on.
/// Bodies of outbound requests are never inspected or mutated, per the
/// non-goals in the design doc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
        }
    }

    pub fn with_method(url: impl Into<String>, method: Method) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    /// The cache key used by the response store: method + URL, since a
    /// GET and a HEAD response for the same URL are distinct entries.
    pub fn cache_key(&self) -> String {
        format!("{:?}:{}", self.method, self.url)
    }
}

/// A response as seen by the core. Bodies are held as raw bytes; callers
/// that need JSON decode them explicitly (the manifest does this).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn gateway_timeout() -> Self {
        Self::new(504, b"Gateway Timeout".to_vec())
    }
}

//! Fakes for every runtime collaborator trait, so integration tests can
//! build a [`crate::driver::Driver`] without a real network or
//! wall clock. Grounded on the teacher's pattern of building managers
//! against fakes (and `wiremock` for anything that really needs HTTP)
//! in `tests/core/*_tests.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::http::{Request, Response};
use crate::runtime::{Clock, NetworkTransport, Random, Timer};

/// A clock test code can advance by hand, kept deliberately separate
/// from `tokio::time`'s virtual clock (which only governs timers, not
/// `chrono::Utc::now()`). Tests that exercise both a debounce timer and
/// an age-based staleness check advance both in lockstep.
#[derive(Clone, Default)]
pub struct FakeClock {
    now_ms: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Wraps `tokio::time::sleep`, which does respect
/// `tokio::time::{pause, advance}` — unlike [`FakeClock`], which must be
/// advanced by hand in lockstep.
#[derive(Clone, Copy, Default)]
pub struct FakeTimer;

#[async_trait]
impl Timer for FakeTimer {
    async fn sleep(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

/// Deterministic cache-bust tokens: `"bust-0"`, `"bust-1"`, ...
#[derive(Clone, Default)]
pub struct SequentialRandom {
    counter: Arc<AtomicUsize>,
}

impl Random for SequentialRandom {
    fn cache_bust_token(&self) -> String {
        format!("bust-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

/// An in-memory routing table from exact URL to canned response, with a
/// call log so tests can assert "exactly N requests, in this order"
/// (the literal assertions the end-to-end scenarios require).
#[derive(Clone, Default)]
pub struct FakeTransport {
    routes: Arc<Mutex<HashMap<String, Response>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, url: impl Into<String>, response: Response) {
        self.routes.lock().await.insert(url.into(), response);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, url: &str) -> usize {
        self.calls.lock().await.iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl NetworkTransport for FakeTransport {
    async fn fetch(&self, req: &Request) -> anyhow::Result<Response> {
        self.calls.lock().await.push(req.url.clone());
        let routes = self.routes.lock().await;
        // Requests that only differ by an appended cache-bust query
        // string should still resolve to the base route, mirroring a
        // real origin server that ignores an unknown query param.
        let base = req.url.split('?').next().unwrap_or(&req.url);
        routes
            .get(&req.url)
            .or_else(|| routes.get(base))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no fake route for {}", req.url))
    }
}

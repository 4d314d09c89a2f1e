use async_trait::async_trait;
use uuid::Uuid;

use crate::runtime::{Clock, Random, Timer};

/// Wall-clock [`Clock`] backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// [`Timer`] backed by `tokio::time::sleep`. Swapped out in tests for a
/// fake that resolves instantly or under `tokio::time::pause`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

/// [`Random`] backed by a v4 UUID, trimmed to a short token — the
/// cache-bust value only needs to be unguessable, not globally unique.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRandom;

impl Random for UuidRandom {
    fn cache_bust_token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

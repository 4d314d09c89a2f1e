use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::runtime::Timer;

/// A deferred task. Any error the task produces must already be
/// swallowed (and optionally logged) by the closure that built it —
/// the scheduler itself never sees a `Result`, matching the design
/// doc's "errors in idle tasks are swallowed" policy.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Inner {
    queue: Vec<Task>,
    generation: u64,
    executing: bool,
}

/// A cooperative debouncer: `schedule` enqueues deferred work,
/// `trigger` (re-)arms a `threshold`-millisecond timer, and timer
/// expiry drains the queue in waves so tasks scheduled mid-drain are
/// picked up by a subsequent wave rather than lost.
pub struct IdleScheduler {
    timer: Arc<dyn Timer>,
    threshold_ms: u64,
    inner: Mutex<Inner>,
    idle_notify: Notify,
}

impl IdleScheduler {
    pub fn new(timer: Arc<dyn Timer>, threshold_ms: u64) -> Self {
        Self {
            timer,
            threshold_ms,
            inner: Mutex::new(Inner {
                queue: Vec::new(),
                generation: 0,
                executing: false,
            }),
            idle_notify: Notify::new(),
        }
    }

    /// Appends `fut` to the queue. Does not by itself arm the timer —
    /// callers pair `schedule` with `trigger` (the host is expected to
    /// call `trigger` once per fetch-event, per the design doc).
    pub async fn schedule<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner.queue.push(Box::pin(fut));
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.queue.is_empty() && !inner.executing
    }

    /// Cancels any pending timer and restarts it for `threshold_ms`.
    /// Requires `Arc<Self>` so the spawned timer task can outlive this
    /// call.
    pub async fn trigger(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.generation
        };
        let scheduler = Arc::clone(self);
        let threshold = self.threshold_ms;
        tokio::spawn(async move {
            scheduler.timer.sleep(threshold).await;
            scheduler.fire(generation).await;
        });
    }

    async fn fire(self: &Arc<Self>, generation: u64) {
        let should_run = {
            let inner = self.inner.lock().await;
            inner.generation == generation
        };
        if !should_run {
            debug!("idle timer superseded by a later trigger, skipping");
            return;
        }
        self.execute().await;
    }

    /// Drains the queue in waves: snapshot the queue, clear it, await
    /// the whole batch concurrently, and repeat until a wave finds
    /// nothing queued. Tasks scheduled during a wave are picked up by
    /// the next one.
    pub async fn execute(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.executing {
                return;
            }
            inner.executing = true;
        }

        loop {
            let batch = {
                let mut inner = self.inner.lock().await;
                std::mem::take(&mut inner.queue)
            };
            if batch.is_empty() {
                break;
            }
            debug!(count = batch.len(), "idle scheduler draining wave");
            futures_util::future::join_all(batch).await;
        }

        {
            let mut inner = self.inner.lock().await;
            inner.executing = false;
        }
        self.idle_notify.notify_waiters();
    }

    /// Resolves once the queue has fully drained. If the queue is
    /// already empty this returns immediately.
    pub async fn idle(&self) {
        loop {
            if self.is_empty().await {
                return;
            }
            let notified = self.idle_notify.notified();
            if self.is_empty().await {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for IdleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleScheduler")
            .field("threshold_ms", &self.threshold_ms)
            .finish()
    }
}

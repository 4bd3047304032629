//! The rate-limited, de-duplicating scheduler that feeds reconciler workers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use landlord_domain::TenantId;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<TenantId>,
    queued: HashSet<TenantId>,
    /// Keys currently held by a worker. At most one worker holds a given key.
    active: HashSet<TenantId>,
    /// Keys re-added while held; re-enqueued on `done`.
    dirty: HashSet<TenantId>,
    /// Consecutive transient failures per key; drives the backoff and the
    /// max-retries upgrade.
    failures: HashMap<TenantId, u32>,
    shut_down: bool,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    backoff_base: Duration,
    backoff_cap: Duration,
}

/// De-duplicating work queue keyed by tenant id.
///
/// Adding a key already enqueued is a no-op; adding a key a worker currently
/// holds marks it dirty for re-processing after release. The per-key rate
/// limiter backs off exponentially (doubling per failure up to the cap) and
/// resets on a successful reconcile. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn new(backoff_base: Duration, backoff_cap: Duration) -> Self {
        WorkQueue {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
                backoff_base,
                backoff_cap,
            }),
        }
    }

    /// Enqueue a key for processing.
    pub fn add(&self, key: TenantId) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.shut_down {
            return;
        }
        if inner.active.contains(&key) {
            trace!(%key, "key held by a worker, marking dirty");
            inner.dirty.insert(key);
            return;
        }
        if inner.queued.insert(key) {
            inner.queue.push_back(key);
            drop(inner);
            self.shared.notify.notify_one();
        }
    }

    /// Record a transient failure for `key` and re-enqueue it after its
    /// backoff delay. Returns the delay that was applied.
    pub fn add_rate_limited(&self, key: TenantId) -> Duration {
        let delay = {
            let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.shut_down {
                // Rate-limited requeues are discarded on shutdown.
                return Duration::ZERO;
            }
            let failures = inner.failures.entry(key).or_insert(0);
            *failures += 1;
            self.backoff_for(*failures)
        };

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
        delay
    }

    /// Exponential backoff: doubles per consecutive failure, capped.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        let delay = self.shared.backoff_base.saturating_mul(1u32 << shift);
        delay.min(self.shared.backoff_cap)
    }

    /// Consecutive transient failures recorded for `key`.
    pub fn failures(&self, key: &TenantId) -> u32 {
        let inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the failure count for `key` after a successful reconcile.
    pub fn forget(&self, key: &TenantId) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failures.remove(key);
    }

    /// Pull the next key, waiting until one is available. Returns None once
    /// the queue has shut down; no new keys are handed out after that.
    pub async fn get(&self) -> Option<TenantId> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
                if inner.shut_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.queued.remove(&key);
                    inner.active.insert(key);
                    // Wake another waiter in case more keys are queued.
                    if !inner.queue.is_empty() {
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release a key after processing. A key marked dirty while held is
    /// re-enqueued immediately.
    pub fn done(&self, key: TenantId) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active.remove(&key);
        if inner.dirty.remove(&key) && !inner.shut_down && inner.queued.insert(key) {
            inner.queue.push_back(key);
            drop(inner);
            self.shared.notify.notify_one();
        }
    }

    /// Stop handing out keys. Pending rate-limited adds become no-ops.
    pub fn shut_down(&self) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.shut_down = true;
        drop(inner);
        self.shared.notify.notify_waiters();
    }

    #[cfg(test)]
    fn queued_len(&self) -> usize {
        let inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.queue.len()
    }
}

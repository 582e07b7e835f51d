/*
 * Omni - fleet management control plane
 * Copyright (C) 2025 Omni contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Computed virtual-resource producers (spec §4.9, §9): a producer per
//! `(type, id)` is started lazily on first watch, writes into an
//! in-memory mirror state, and is torn down after an idle interval. This
//! `DedupScheduler` reference-counts watchers so N concurrent watchers
//! share one producer, deduplicates concurrent creation with a
//! `singleflight`-style per-key async mutex, and exposes a `sweep` a
//! caller drives on a timer to destroy producers that have been idle
//! long enough.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A long-lived computed-state producer for one `(type, id)` key (spec
/// §4.9: "permissions, current-user, Kubernetes usage, label
/// completions, metal/SBC/cloud platform catalogues").
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn run(self: Arc<Self>, cancel: CancellationToken);
}

struct Entry<P> {
    producer: Arc<P>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    refcount: AtomicUsize,
    idle_since: Mutex<Option<Instant>>,
}

/// Reference-counts watchers per `(kind, id)` key and owns the
/// producer's lifetime: started on the first `acquire`, torn down once
/// `sweep` observes it idle (refcount zero) for at least the configured
/// interval.
pub struct DedupScheduler<P> {
    entries: DashMap<String, Arc<Entry<P>>>,
    build_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl<P> Default for DedupScheduler<P> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            build_locks: DashMap::new(),
        }
    }
}

impl<P> DedupScheduler<P>
where
    P: Producer,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: &str, id: &str) -> String {
        format!("{kind}/{id}")
    }

    /// Returns the producer for `(kind, id)`, starting it via `build` if
    /// this is the first live watcher. Concurrent callers for the same
    /// key share a single build (singleflight).
    pub async fn acquire(&self, kind: &str, id: &str, build: impl FnOnce() -> P) -> Arc<P> {
        let key = Self::key(kind, id);

        if let Some(entry) = self.entries.get(&key) {
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            *entry.idle_since.lock() = None;
            return entry.producer.clone();
        }

        let lock = self.build_locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.entries.get(&key) {
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            *entry.idle_since.lock() = None;
            return entry.producer.clone();
        }

        let producer = Arc::new(build());
        let cancel = CancellationToken::new();
        let task_producer = producer.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { task_producer.run(task_cancel).await });

        let entry = Arc::new(Entry {
            producer: producer.clone(),
            cancel,
            handle,
            refcount: AtomicUsize::new(1),
            idle_since: Mutex::new(None),
        });
        self.entries.insert(key, entry);
        producer
    }

    /// Releases one reference; once the last watcher releases, the entry
    /// is marked idle so the next `sweep` can destroy it.
    pub fn release(&self, kind: &str, id: &str) {
        let key = Self::key(kind, id);
        if let Some(entry) = self.entries.get(&key) {
            let remaining = entry.refcount.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining == 0 {
                *entry.idle_since.lock() = Some(Instant::now());
            }
        }
    }

    /// Destroys every producer that has been idle (refcount zero) for at
    /// least `idle_interval`. Intended to be called periodically by a
    /// sweeper task (spec §4.9, §9: "a periodic sweeper destroys stale
    /// producers").
    pub fn sweep(&self, idle_interval: Duration) {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter_map(|e| {
                let idle_since = *e.value().idle_since.lock();
                match idle_since {
                    Some(since) if since.elapsed() >= idle_interval => Some(e.key().clone()),
                    _ => None,
                }
            })
            .collect();

        for key in stale {
            if let Some((_, entry)) = self.entries.remove(&key) {
                debug!(key, "tearing down idle virtual-resource producer");
                entry.cancel.cancel();
                entry.handle.abort();
            }
        }
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingProducer {
        started: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Producer for CountingProducer {
        async fn run(self: Arc<Self>, cancel: CancellationToken) {
            self.started.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
        }
    }

    #[tokio::test]
    async fn concurrent_acquire_shares_one_producer() {
        let scheduler: DedupScheduler<CountingProducer> = DedupScheduler::new();
        let started = Arc::new(AtomicU32::new(0));

        let p1 = scheduler.acquire("Permissions", "user-1", || CountingProducer { started: started.clone() }).await;
        let p2 = scheduler.acquire("Permissions", "user-1", || CountingProducer { started: started.clone() }).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.live_count(), 1);
    }

    #[tokio::test]
    async fn sweep_tears_down_only_after_idle_interval() {
        let scheduler: DedupScheduler<CountingProducer> = DedupScheduler::new();
        let started = Arc::new(AtomicU32::new(0));
        scheduler.acquire("Permissions", "user-1", || CountingProducer { started: started.clone() }).await;
        scheduler.release("Permissions", "user-1");

        scheduler.sweep(Duration::from_secs(60));
        assert_eq!(scheduler.live_count(), 1, "not idle long enough yet");

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.sweep(Duration::from_millis(10));
        assert_eq!(scheduler.live_count(), 0);
    }

    #[tokio::test]
    async fn reacquire_before_sweep_cancels_teardown() {
        let scheduler: DedupScheduler<CountingProducer> = DedupScheduler::new();
        let started = Arc::new(AtomicU32::new(0));
        scheduler.acquire("Permissions", "user-1", || CountingProducer { started: started.clone() }).await;
        scheduler.release("Permissions", "user-1");
        scheduler.acquire("Permissions", "user-1", || CountingProducer { started: started.clone() }).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.sweep(Duration::from_millis(1));
        assert_eq!(scheduler.live_count(), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}

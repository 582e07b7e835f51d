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

//! TTL+LRU+singleflight cache for per-cluster Talos API clients (spec §5,
//! §9): at most `capacity` live entries, each valid for `ttl`; concurrent
//! misses for the same key are deduplicated so only one connection is
//! built. There is no explicit close step — clients are reference-counted
//! `Arc`s, so the underlying `tonic::Channel` is torn down by `Drop` once
//! the cache evicts its own reference and no reconciler still holds one
//! (the Rust analogue of the "runtime finalizer" the distilled spec
//! names).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;

#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

struct Entry<T> {
    value: Arc<T>,
    inserted_at: Instant,
}

struct Shared<T> {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
    recency: Mutex<VecDeque<String>>,
    build_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    metrics: CacheMetrics,
}

/// A TTL+LRU cache keyed by cluster id, deduplicating concurrent builders
/// of the same key.
pub struct ClientCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ClientCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> ClientCache<T> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                ttl,
                entries: Mutex::new(HashMap::new()),
                recency: Mutex::new(VecDeque::new()),
                build_locks: DashMap::new(),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.shared.metrics
    }

    /// Returns the cached client for `key`, building and inserting one via
    /// `build` on a cache miss or expiry. Concurrent callers for the same
    /// `key` share a single in-flight build (spec §5 "construction is
    /// deduplicated via singleflight").
    pub async fn get_or_connect<F, Fut>(&self, key: &str, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.try_get(key) {
            return Ok(value);
        }

        let lock = self
            .shared
            .build_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have built it while we waited for the lock.
        if let Some(value) = self.try_get(key) {
            return Ok(value);
        }

        let built = Arc::new(build().await?);
        self.insert(key, built.clone());
        Ok(built)
    }

    fn try_get(&self, key: &str) -> Option<Arc<T>> {
        let mut entries = self.shared.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.shared.ttl,
            None => {
                self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            entries.remove(key);
            self.shared.recency.lock().retain(|k| k != key);
            self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        self.touch(key);
        entries.get(key).map(|e| e.value.clone())
    }

    fn touch(&self, key: &str) {
        let mut recency = self.shared.recency.lock();
        recency.retain(|k| k != key);
        recency.push_back(key.to_string());
    }

    fn insert(&self, key: &str, value: Arc<T>) {
        let mut entries = self.shared.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        drop(entries);
        self.touch(key);

        let mut recency = self.shared.recency.lock();
        while recency.len() > self.shared.capacity {
            if let Some(oldest) = recency.pop_front() {
                if self.shared.entries.lock().remove(&oldest).is_some() {
                    self.shared.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Drops the cached entry for `key`, forcing the next `get_or_connect`
    /// to rebuild it. Wired to watches on `ClusterEndpoint`/`TalosConfig`
    /// (spec §5).
    pub fn invalidate(&self, key: &str) {
        let removed = self.shared.entries.lock().remove(key).is_some();
        self.shared.recency.lock().retain(|k| k != key);
        if removed {
            self.shared.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn caches_and_reuses_built_client() {
        let cache: ClientCache<u32> = ClientCache::new(8, Duration::from_secs(60));
        let builds = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let builds = builds.clone();
            let value = cache
                .get_or_connect("cluster-a", || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(*value, 42);
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().hits(), 2);
        assert_eq!(cache.metrics().misses(), 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_entry_over_capacity() {
        let cache: ClientCache<u32> = ClientCache::new(2, Duration::from_secs(60));
        for id in 0..3u32 {
            cache
                .get_or_connect(&format!("cluster-{id}"), || async move { Ok(id) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().evictions(), 1);
        assert!(cache.try_get("cluster-0").is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_rebuilt() {
        let cache: ClientCache<u32> = ClientCache::new(8, Duration::from_millis(1));
        cache.get_or_connect("cluster-a", || async { Ok(1) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let builds = Arc::new(AtomicUsize::new(0));
        let builds2 = builds.clone();
        cache
            .get_or_connect("cluster-a", || async move {
                builds2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let cache: ClientCache<u32> = ClientCache::new(8, Duration::from_secs(60));
        cache.get_or_connect("cluster-a", || async { Ok(1) }).await.unwrap();
        cache.invalidate("cluster-a");
        assert!(cache.is_empty());
    }
}

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

//! The controller-runtime contract (spec §2.2): watches one resource
//! kind, guarantees at-least-once reconciliation on input change, caps
//! concurrency to a fixed worker pool, and serializes reconciles of a
//! single resource (spec §5: "For a single machine, at most one
//! reconcile is in flight").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use omni_resources::{Metadata, TypedStore, WatchEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{debug, instrument, warn};

use crate::action::Action;
use crate::error::ReconcileError;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

type Locks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Drives reconciliation for one resource kind until its watch channel
/// closes. `workers` bounds the number of reconciles running at once
/// across all resources of this kind (spec §5: "the config-status
/// controller is configured with 8 concurrent workers").
pub struct Controller<T> {
    store: TypedStore<T>,
    workers: usize,
}

impl<T> Controller<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(store: TypedStore<T>, workers: usize) -> Self {
        Self { store, workers }
    }

    /// Runs the reconcile loop. `reconcile` is invoked with the resource's
    /// current metadata/spec (always freshly read from the store, never
    /// the possibly-stale payload carried by the watch event) and the
    /// shared context.
    pub async fn run<Ctx, F, Fut>(self, ctx: Arc<Ctx>, reconcile: F)
    where
        Ctx: Send + Sync + 'static,
        F: Fn(Metadata, T, Arc<Ctx>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = crate::error::Result<Action>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let locks: Locks = Arc::new(DashMap::new());
        let mut events = self.store.watch_kind();

        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(id) = event_id(&event) else { continue };
                    spawn_reconcile(
                        self.store.clone(),
                        semaphore.clone(),
                        locks.clone(),
                        id,
                        ctx.clone(),
                        reconcile.clone(),
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "controller watch lagged, resubscribing will miss intermediate events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn event_id<S>(event: &WatchEvent<S>) -> Option<String> {
    event.resource_id().map(|id| id.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::{InMemoryStore, Metadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn drives_reconcile_on_create_and_update() {
        let store: TypedStore<Vec<u8>> = TypedStore::new(InMemoryStore::new(), "default", "Widget");
        let controller = Controller::new(store.clone(), 4);
        let seen = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(controller.run(seen.clone(), |_metadata, _spec, seen: Arc<AtomicUsize>| async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Action::await_change())
        }));

        store.create(Metadata::new("default", "Widget", "w1"), vec![1]).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.update("w1", 1, vec![2], |_| {}).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(seen.load(Ordering::SeqCst) >= 2, "expected at least create + update reconciles");
        handle.abort();
    }

    #[tokio::test]
    async fn requeue_action_reschedules_without_a_new_event() {
        let store: TypedStore<Vec<u8>> = TypedStore::new(InMemoryStore::new(), "default", "Widget");
        let controller = Controller::new(store.clone(), 1);
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(controller.run(calls.clone(), |_metadata, _spec, calls: Arc<AtomicUsize>| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(Action::requeue(Duration::from_millis(5)))
            } else {
                Ok(Action::await_change())
            }
        }));

        store.create(Metadata::new("default", "Widget", "w1"), vec![1]).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(calls.load(Ordering::SeqCst) >= 2, "the requeue action should trigger a second reconcile");
        handle.abort();
    }
}

fn spawn_reconcile<T, Ctx, F, Fut>(
    store: TypedStore<T>,
    semaphore: Arc<Semaphore>,
    locks: Locks,
    id: String,
    ctx: Arc<Ctx>,
    reconcile: F,
) where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    Ctx: Send + Sync + 'static,
    F: Fn(Metadata, T, Arc<Ctx>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = crate::error::Result<Action>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return;
            };
            let lock = locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = lock.lock().await;

            let outcome = match store.try_get(&id) {
                Ok(Some((metadata, spec))) => Some(reconcile_once(&id, metadata, spec, ctx.clone(), &reconcile).await),
                Ok(None) => None,
                Err(e) => {
                    warn!(%id, error = %e, "failed to read resource for reconcile");
                    None
                }
            };
            drop(_guard);
            drop(permit);

            match outcome {
                Some(Some(delay)) => tokio::time::sleep(delay).await,
                Some(None) | None => return,
            }
        }
    });
}

#[instrument(skip(spec, ctx, reconcile), fields(resource_id = %id))]
async fn reconcile_once<T, Ctx, F, Fut>(
    id: &str,
    metadata: Metadata,
    spec: T,
    ctx: Arc<Ctx>,
    reconcile: &F,
) -> Option<Duration>
where
    F: Fn(Metadata, T, Arc<Ctx>) -> Fut,
    Fut: Future<Output = crate::error::Result<Action>>,
{
    match reconcile(metadata, spec, ctx).await {
        Ok(Action::Requeue(delay)) => Some(delay),
        Ok(Action::AwaitChange) => None,
        Err(ReconcileError::Skip(reason)) => {
            debug!(%reason, "reconcile skipped");
            None
        }
        Err(ReconcileError::RequeueAfter { delay, reason }) => {
            debug!(%reason, ?delay, "reconcile requeued");
            Some(delay)
        }
        Err(e) => {
            warn!(error = %e, "reconcile failed, backing off");
            Some(DEFAULT_BACKOFF)
        }
    }
}

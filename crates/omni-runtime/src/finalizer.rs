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

//! Generic finalizer-driven reconcile wrapper (spec §3 Lifecycle:
//! "Teardown is gated: the controller performs reset, removes its
//! finalizers, and only then allows the runtime to destroy its output").
//! Mirrors `kube::runtime::finalizer::finalizer`/`Event`.

use std::future::Future;

use omni_resources::{Metadata, Phase, TypedStore};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::action::Action;
use crate::error::{ReconcileError, Result};

pub enum FinalizerEvent<T> {
    Apply(Metadata, T),
    Cleanup(Metadata, T),
}

/// Drives `store`'s finalizer list for `resource` around `handler`:
///
/// - `Phase::Running` with the finalizer absent: add it, then call
///   `Apply`.
/// - `Phase::Running` with the finalizer present: call `Apply` directly.
/// - `Phase::TearingDown`: call `Cleanup`; on success remove the
///   finalizer, and if no finalizers remain, physically destroy the
///   resource.
pub async fn finalizer<T, F, Fut>(
    store: &TypedStore<T>,
    finalizer_name: &str,
    metadata: Metadata,
    spec: T,
    handler: F,
) -> Result<Action>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnOnce(FinalizerEvent<T>) -> Fut,
    Fut: Future<Output = Result<Action>>,
{
    match metadata.phase {
        Phase::TearingDown => {
            if !metadata.has_finalizer(finalizer_name) {
                // Already cleaned up by a previous reconcile; nothing to
                // do until the store physically removes it.
                return Ok(Action::await_change());
            }
            let id = metadata.id.clone();
            let version = metadata.version;
            let action = handler(FinalizerEvent::Cleanup(metadata, spec.clone())).await?;

            let updated = store.update(&id, version, spec, |m| {
                m.remove_finalizer(finalizer_name);
            })?;
            if updated.0.finalizers.is_empty() {
                store.finalize_destroy(&id)?;
            }
            Ok(action)
        }
        Phase::Running => {
            let (metadata, spec) = if !metadata.has_finalizer(finalizer_name) {
                let id = metadata.id.clone();
                let version = metadata.version;
                store.update(&id, version, spec, |m| {
                    m.add_finalizer(finalizer_name);
                })?
            } else {
                (metadata, spec)
            };
            handler(FinalizerEvent::Apply(metadata, spec)).await
        }
    }
}

/// Read-modify-write retry loop for optimistic-concurrency conflicts
/// (spec §5: "writers must either retry on conflict ... or read-modify-
/// write in a bounded loop"). Used by controllers that update a resource
/// outside the finalizer helper (e.g. releasing the config-update slot).
pub fn retry_update<T, F>(store: &TypedStore<T>, name: &str, mut attempts: u32, mut f: F) -> Result<()>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnMut(&Metadata, &T) -> T,
{
    loop {
        let (metadata, spec) = store.get(name).map_err(ReconcileError::Store)?;
        let version = metadata.version;
        let next = f(&metadata, &spec);
        match store.update(name, version, next, |_| {}) {
            Ok(_) => return Ok(()),
            Err(omni_resources::StoreError::Conflict { .. }) if attempts > 0 => {
                attempts -= 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::InMemoryStore;

    fn store() -> TypedStore<Vec<u8>> {
        TypedStore::new(InMemoryStore::new(), "default", "Widget")
    }

    #[tokio::test]
    async fn running_adds_finalizer_before_apply() {
        let store = store();
        let meta = Metadata::new("default", "Widget", "w1");
        store.create(meta.clone(), vec![1]).unwrap();

        let action = finalizer(&store, "widget.finalizer", meta, vec![1], |event| async move {
            match event {
                FinalizerEvent::Apply(metadata, _) => {
                    assert!(metadata.has_finalizer("widget.finalizer"));
                    Ok(Action::await_change())
                }
                FinalizerEvent::Cleanup(..) => panic!("unexpected cleanup"),
            }
        })
        .await
        .unwrap();

        assert!(matches!(action, Action::AwaitChange));
        let (metadata, _) = store.get("w1").unwrap();
        assert!(metadata.has_finalizer("widget.finalizer"));
    }

    #[tokio::test]
    async fn tearing_down_removes_finalizer_and_destroys_when_last() {
        let store = store();
        let mut meta = Metadata::new("default", "Widget", "w1");
        meta.add_finalizer("widget.finalizer");
        store.create(meta.clone(), vec![1]).unwrap();
        store.destroy("w1", meta.version).unwrap();
        let (meta, spec) = store.get("w1").unwrap();

        finalizer(&store, "widget.finalizer", meta, spec, |event| async move {
            match event {
                FinalizerEvent::Cleanup(..) => Ok(Action::await_change()),
                FinalizerEvent::Apply(..) => panic!("unexpected apply"),
            }
        })
        .await
        .unwrap();

        assert!(store.get("w1").is_err());
    }

    #[tokio::test]
    async fn tearing_down_without_finalizer_is_a_noop() {
        let store = store();
        let meta = Metadata::new("default", "Widget", "w1");
        store.create(meta.clone(), vec![1]).unwrap();
        store.destroy("w1", meta.version).unwrap();
        let (meta, spec) = store.get("w1").unwrap();

        let action = finalizer(&store, "widget.finalizer", meta, spec, |_| async move {
            panic!("handler should not run without the finalizer")
        })
        .await
        .unwrap();

        assert!(matches!(action, Action::AwaitChange));
    }

    #[test]
    fn retry_update_retries_on_conflict_then_succeeds() {
        let store = store();
        let meta = Metadata::new("default", "Widget", "w1");
        store.create(meta, vec![1]).unwrap();

        // Force a stale read by bumping the version out from under the closure
        // on its first invocation, simulating a concurrent writer.
        let mut first = true;
        retry_update(&store, "w1", 1, |_metadata, spec| {
            if first {
                first = false;
                store.update("w1", 1, vec![2], |_| {}).unwrap();
            }
            let mut next = spec.clone();
            next.push(9);
            next
        })
        .unwrap();

        let (_, spec) = store.get("w1").unwrap();
        assert_eq!(spec, vec![2, 9]);
    }
}

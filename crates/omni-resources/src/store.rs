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

//! `Store`: the typed, namespaced, versioned key-value resource store
//! (spec §2.1). Values are carried as `serde_json::Value` internally so a
//! single store instance can hold every resource kind; `TypedStore`
//! (below) is the ergonomic, generic-over-`T` facade controllers actually
//! use, analogous to how `kube::Api<K>` wraps the untyped Kubernetes REST
//! client.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::metadata::{Metadata, Phase, ResourceId};
use crate::events::WatchEvent;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    #[error("resource already exists: {0}")]
    AlreadyExists(ResourceId),

    #[error("version conflict on {0}: expected {expected}, found {found}")]
    Conflict {
        id: ResourceId,
        expected: u64,
        found: u64,
    },

    #[error("resource {0} is tearing down and cannot be destroyed again")]
    AlreadyTearingDown(ResourceId),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// An untyped resource as held by the store.
#[derive(Debug, Clone)]
pub struct StoredResource {
    pub metadata: Metadata,
    pub spec: serde_json::Value,
}

#[derive(Clone)]
struct Slot {
    resource: StoredResource,
    tx: broadcast::Sender<WatchEvent<serde_json::Value>>,
}

/// In-memory implementation of the resource store. Production Omni backs
/// this with COSI/etcd; for this reconciliation core an in-process store
/// is sufficient and keeps the crate dependency-free of any particular
/// backing database, matching SPEC_FULL.md's "single persistent resource
/// store is assumed" non-goal.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    items: Arc<DashMap<ResourceId, Slot>>,
    kind_tx: Arc<DashMap<(String, String), broadcast::Sender<WatchEvent<serde_json::Value>>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn kind_sender(&self, namespace: &str, kind: &str) -> broadcast::Sender<WatchEvent<serde_json::Value>> {
        self.kind_tx
            .entry((namespace.to_string(), kind.to_string()))
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }

    fn notify(&self, id: &ResourceId, event: WatchEvent<serde_json::Value>) {
        if let Some(slot) = self.items.get(id) {
            let _ = slot.tx.send(event.clone());
        }
        let _ = self.kind_sender(&id.namespace, &id.kind).send(event);
    }

    pub fn get(&self, id: &ResourceId) -> Result<StoredResource, StoreError> {
        self.items
            .get(id)
            .map(|s| s.resource.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn list(&self, namespace: &str, kind: &str) -> Vec<StoredResource> {
        self.items
            .iter()
            .filter(|e| e.key().namespace == namespace && e.key().kind == kind)
            .map(|e| e.value().resource.clone())
            .collect()
    }

    pub fn create(&self, metadata: Metadata, spec: serde_json::Value) -> Result<StoredResource, StoreError> {
        let id = metadata.resource_id();
        if self.items.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let mut metadata = metadata;
        metadata.version = 1;
        let resource = StoredResource { metadata, spec };
        let (tx, _rx) = broadcast::channel(64);
        self.items.insert(id.clone(), Slot { resource: resource.clone(), tx });
        self.notify(&id, WatchEvent::Created(id.clone(), resource.spec.clone()));
        Ok(resource)
    }

    /// Read-modify-write update. `expected_version` must match the
    /// currently stored version (optimistic concurrency, spec §2.1);
    /// callers retry on `StoreError::Conflict` (the controller runtime
    /// wraps this loop for them, see `omni-runtime::retry_update`).
    pub fn update(
        &self,
        id: &ResourceId,
        expected_version: u64,
        f: impl FnOnce(&mut Metadata, &mut serde_json::Value),
    ) -> Result<StoredResource, StoreError> {
        let mut slot = self
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if slot.resource.metadata.version != expected_version {
            return Err(StoreError::Conflict {
                id: id.clone(),
                expected: expected_version,
                found: slot.resource.metadata.version,
            });
        }
        let before = slot.resource.clone();
        f(&mut slot.resource.metadata, &mut slot.resource.spec);
        slot.resource.metadata.version += 1;
        slot.resource.metadata.updated = chrono::Utc::now();
        let after = slot.resource.clone();
        let tx = slot.tx.clone();
        drop(slot);

        let event = if after.spec == before.spec && after.metadata.phase == before.metadata.phase {
            WatchEvent::Noop(id.clone())
        } else {
            WatchEvent::Updated(id.clone(), after.spec.clone())
        };
        let _ = tx.send(event.clone());
        let _ = self.kind_sender(&id.namespace, &id.kind).send(event);
        Ok(after)
    }

    /// Moves a resource to `Phase::TearingDown`. The resource is only
    /// actually removed once every finalizer has been cleared (the
    /// runtime's `finalizer` helper drives that), at which point
    /// `finalize_destroy` performs the physical removal.
    pub fn destroy(&self, id: &ResourceId, expected_version: u64) -> Result<StoredResource, StoreError> {
        let mut slot = self
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if slot.resource.metadata.phase == Phase::TearingDown {
            return Err(StoreError::AlreadyTearingDown(id.clone()));
        }
        if slot.resource.metadata.version != expected_version {
            return Err(StoreError::Conflict {
                id: id.clone(),
                expected: expected_version,
                found: slot.resource.metadata.version,
            });
        }
        slot.resource.metadata.phase = Phase::TearingDown;
        slot.resource.metadata.version += 1;
        slot.resource.metadata.updated = chrono::Utc::now();
        let after = slot.resource.clone();
        drop(slot);
        self.notify(&id.clone(), WatchEvent::Updated(id.clone(), after.spec.clone()));
        Ok(after)
    }

    /// Physically removes a resource once its finalizer list is empty.
    pub fn finalize_destroy(&self, id: &ResourceId) -> Result<(), StoreError> {
        let (_, slot) = self
            .items
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !slot.resource.metadata.finalizers.is_empty() {
            // Put it back; destroying with outstanding finalizers is a
            // caller bug, not a store-level conflict.
            self.items.insert(id.clone(), slot);
            return Err(StoreError::AlreadyTearingDown(id.clone()));
        }
        self.notify(id, WatchEvent::Destroyed(id.clone()));
        Ok(())
    }

    #[must_use]
    pub fn watch(&self, id: &ResourceId) -> broadcast::Receiver<WatchEvent<serde_json::Value>> {
        if let Some(slot) = self.items.get(id) {
            slot.tx.subscribe()
        } else {
            broadcast::channel(1).0.subscribe()
        }
    }

    #[must_use]
    pub fn watch_kind(&self, namespace: &str, kind: &str) -> broadcast::Receiver<WatchEvent<serde_json::Value>> {
        self.kind_sender(namespace, kind).subscribe()
    }
}

/// Ergonomic typed facade over `InMemoryStore` for a single resource kind
/// `T`, mirroring `kube::Api<K>`.
pub struct TypedStore<T> {
    inner: InMemoryStore,
    namespace: String,
    kind: String,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            namespace: self.namespace.clone(),
            kind: self.kind.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> TypedStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(inner: InMemoryStore, namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
            kind: kind.into(),
            _marker: std::marker::PhantomData,
        }
    }

    fn id(&self, name: &str) -> ResourceId {
        ResourceId::new(self.namespace.clone(), self.kind.clone(), name.to_string())
    }

    pub fn get(&self, name: &str) -> Result<(Metadata, T), StoreError> {
        let stored = self.inner.get(&self.id(name))?;
        let spec = serde_json::from_value(stored.spec)?;
        Ok((stored.metadata, spec))
    }

    pub fn try_get(&self, name: &str) -> Result<Option<(Metadata, T)>, StoreError> {
        match self.get(name) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list(&self) -> Result<Vec<(Metadata, T)>, StoreError> {
        self.inner
            .list(&self.namespace, &self.kind)
            .into_iter()
            .map(|s| Ok((s.metadata, serde_json::from_value(s.spec)?)))
            .collect()
    }

    pub fn list_labeled(&self, key: &str, value: &str) -> Result<Vec<(Metadata, T)>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(m, _)| m.label(key) == Some(value))
            .collect())
    }

    pub fn create(&self, mut metadata: Metadata, spec: T) -> Result<(Metadata, T), StoreError> {
        metadata.namespace = self.namespace.clone();
        metadata.kind = self.kind.clone();
        let stored = self.inner.create(metadata, serde_json::to_value(&spec)?)?;
        Ok((stored.metadata, spec))
    }

    pub fn update(
        &self,
        name: &str,
        expected_version: u64,
        spec: T,
        mutate_meta: impl FnOnce(&mut Metadata),
    ) -> Result<(Metadata, T), StoreError> {
        let value = serde_json::to_value(&spec)?;
        let stored = self.inner.update(&self.id(name), expected_version, |meta, v| {
            mutate_meta(meta);
            *v = value.clone();
        })?;
        Ok((stored.metadata, spec))
    }

    pub fn destroy(&self, name: &str, expected_version: u64) -> Result<Metadata, StoreError> {
        Ok(self.inner.destroy(&self.id(name), expected_version)?.metadata)
    }

    pub fn finalize_destroy(&self, name: &str) -> Result<(), StoreError> {
        self.inner.finalize_destroy(&self.id(name))
    }

    /// Subscribe to every `Created`/`Updated`/`Destroyed`/`Noop` event for
    /// this kind, used by the controller scheduler to drive reconciles.
    #[must_use]
    pub fn watch_kind(&self) -> broadcast::Receiver<WatchEvent<serde_json::Value>> {
        self.inner.watch_kind(&self.namespace, &self.kind)
    }
}

/// Groups all per-cluster/per-machine label values used to stamp derived
/// resources, e.g. when copying cluster-identifying labels onto
/// `ClusterMachineConfigStatus` (spec §4.1.2 step 7).
#[must_use]
pub fn cluster_identifying_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    const CARRIED: &[&str] = &["cluster-uuid", "cluster-name", "machine-set"];
    labels
        .iter()
        .filter(|(k, _)| CARRIED.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

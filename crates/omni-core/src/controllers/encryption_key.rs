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

//! Cluster-machine encryption-key controller (spec §4.4): generates a
//! 32-byte state-encryption key for a `ClusterMachine` the first time it
//! is seen and never touches it again (invariant 4: immutable once set).
//! Holds `ENCRYPTION_KEY_FINALIZER` on the `ClusterMachine` until every
//! other controller has released it, so the key outlives whatever still
//! needs it during teardown.

use std::sync::Arc;

use omni_resources::well_known::ENCRYPTION_KEY_FINALIZER;
use omni_resources::{ClusterMachineEncryptionKeySpec, ClusterMachineSpec, Kind, Metadata, TypedStore};
use omni_runtime::finalizer::{finalizer, FinalizerEvent};
use omni_runtime::{Action, ReconcileError, Result};
use rand::RngCore;
use tracing::instrument;

pub struct EncryptionKeyContext {
    pub cluster_machine: TypedStore<ClusterMachineSpec>,
    pub encryption_key: TypedStore<ClusterMachineEncryptionKeySpec>,
}

#[instrument(skip(spec, ctx), fields(machine = %metadata.id))]
pub async fn reconcile(metadata: Metadata, spec: ClusterMachineSpec, ctx: Arc<EncryptionKeyContext>) -> Result<Action> {
    let store = ctx.cluster_machine.clone();
    finalizer(&store, ENCRYPTION_KEY_FINALIZER, metadata, spec, move |event| {
        let ctx = ctx.clone();
        async move {
            match event {
                FinalizerEvent::Apply(metadata, spec) => apply(metadata, spec, ctx).await,
                FinalizerEvent::Cleanup(metadata, spec) => cleanup(metadata, spec, ctx).await,
            }
        }
    })
    .await
}

async fn apply(metadata: Metadata, spec: ClusterMachineSpec, ctx: Arc<EncryptionKeyContext>) -> Result<Action> {
    let _ = spec;
    let machine_id = metadata.id.clone();

    match ctx.encryption_key.try_get(&machine_id)? {
        Some((_, existing)) if !existing.data.is_empty() => {}
        None => {
            let meta = Metadata::new("default", ClusterMachineEncryptionKeySpec::KIND, machine_id.clone());
            ctx.encryption_key.create(meta, ClusterMachineEncryptionKeySpec { data: random_key() })?;
        }
        Some((meta, _)) => {
            // Key resource exists but data was never filled in (e.g. a
            // previous reconcile was interrupted); fill it once.
            let version = meta.version;
            ctx.encryption_key
                .update(&machine_id, version, ClusterMachineEncryptionKeySpec { data: random_key() }, |_| {})?;
        }
    }

    Ok(Action::await_change())
}

/// Spec §4.4: teardown is deferred until every other controller has
/// released the `ClusterMachine` — this is the last finalizer to go.
async fn cleanup(metadata: Metadata, spec: ClusterMachineSpec, ctx: Arc<EncryptionKeyContext>) -> Result<Action> {
    let _ = spec;
    let other_finalizers = metadata.finalizers.iter().filter(|f| f.as_str() != ENCRYPTION_KEY_FINALIZER).count();
    if other_finalizers > 0 {
        return Err(ReconcileError::skip("other controllers still hold this cluster machine"));
    }

    if let Some((meta, _)) = ctx.encryption_key.try_get(&metadata.id)? {
        ctx.encryption_key.destroy(&metadata.id, meta.version)?;
        ctx.encryption_key.finalize_destroy(&metadata.id)?;
    }

    Ok(Action::await_change())
}

fn random_key() -> Vec<u8> {
    let mut bytes = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::InMemoryStore;

    fn ctx() -> Arc<EncryptionKeyContext> {
        Arc::new(EncryptionKeyContext {
            cluster_machine: TypedStore::new(InMemoryStore::new(), "default", "ClusterMachine"),
            encryption_key: TypedStore::new(InMemoryStore::new(), "default", "ClusterMachineEncryptionKey"),
        })
    }

    #[tokio::test]
    async fn generates_key_once_and_never_overwrites_it() {
        let ctx = ctx();
        let meta = Metadata::new("default", "ClusterMachine", "m1");
        ctx.cluster_machine.create(meta.clone(), ClusterMachineSpec { machine_set: "ms1".into() }).unwrap();

        reconcile(meta.clone(), ClusterMachineSpec { machine_set: "ms1".into() }, ctx.clone()).await.unwrap();
        let (_, key1) = ctx.encryption_key.get("m1").unwrap();
        assert_eq!(key1.data.len(), 32);

        let (meta2, _) = ctx.cluster_machine.get("m1").unwrap();
        reconcile(meta2, ClusterMachineSpec { machine_set: "ms1".into() }, ctx.clone()).await.unwrap();
        let (_, key2) = ctx.encryption_key.get("m1").unwrap();
        assert_eq!(key1.data, key2.data, "key must never change once set");
    }

    #[tokio::test]
    async fn cleanup_waits_for_other_finalizers_to_clear() {
        let ctx = ctx();
        let mut meta = Metadata::new("default", "ClusterMachine", "m1");
        meta.add_finalizer("SomeOtherController");
        ctx.cluster_machine.create(meta.clone(), ClusterMachineSpec { machine_set: "ms1".into() }).unwrap();
        reconcile(meta, ClusterMachineSpec { machine_set: "ms1".into() }, ctx.clone()).await.unwrap();

        let (meta, spec) = ctx.cluster_machine.get("m1").unwrap();
        let version = meta.version;
        ctx.cluster_machine.destroy("m1", version).unwrap();
        let (meta, _) = ctx.cluster_machine.get("m1").unwrap();

        // Other finalizer still present: encryption key must survive.
        reconcile(meta, spec, ctx.clone()).await.ok();
        assert!(ctx.encryption_key.try_get("m1").unwrap().is_some());
    }
}

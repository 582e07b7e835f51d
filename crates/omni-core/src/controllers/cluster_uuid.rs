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

//! Cluster UUID controller (spec §4.3): generates a random UUIDv4 once
//! per cluster and keeps the `cluster-uuid` label mirrored onto it
//! forever after (invariant 3: "stable once set").

use std::sync::Arc;

use omni_resources::well_known::CLUSTER_UUID;
use omni_resources::{ClusterSpec, ClusterUuidSpec, Kind, Metadata, TypedStore};
use omni_runtime::{Action, ReconcileError, Result};
use tracing::instrument;

pub struct ClusterUuidContext {
    pub cluster_uuid: TypedStore<ClusterUuidSpec>,
}

#[instrument(skip(spec, ctx), fields(cluster = %metadata.id))]
pub async fn reconcile(metadata: Metadata, spec: ClusterSpec, ctx: Arc<ClusterUuidContext>) -> Result<Action> {
    let _ = spec;
    let cluster_id = metadata.id.clone();

    match ctx.cluster_uuid.try_get(&cluster_id)? {
        Some((existing_meta, existing_spec)) => {
            // Already generated: only the mirrored label may need a
            // refresh, the uuid itself is immutable (invariant 3).
            if existing_meta.label(CLUSTER_UUID) == Some(existing_spec.uuid.as_str()) {
                return Ok(Action::await_change());
            }
            let version = existing_meta.version;
            ctx.cluster_uuid.update(&cluster_id, version, existing_spec.clone(), |m| {
                m.labels.insert(CLUSTER_UUID.to_string(), existing_spec.uuid.clone());
            })?;
            Ok(Action::await_change())
        }
        None => {
            let uuid = uuid::Uuid::new_v4().to_string();
            let mut new_meta = Metadata::new(metadata.namespace.clone(), ClusterUuidSpec::KIND, cluster_id.clone());
            new_meta.labels.insert(CLUSTER_UUID.to_string(), uuid.clone());
            ctx.cluster_uuid
                .create(new_meta, ClusterUuidSpec { uuid })
                .map_err(ReconcileError::Store)?;
            Ok(Action::await_change())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::InMemoryStore;

    fn ctx() -> Arc<ClusterUuidContext> {
        Arc::new(ClusterUuidContext {
            cluster_uuid: TypedStore::new(InMemoryStore::new(), "default", "ClusterUUID"),
        })
    }

    #[tokio::test]
    async fn generates_uuid_once_and_mirrors_label() {
        let ctx = ctx();
        let meta = Metadata::new("default", "Cluster", "c1");
        reconcile(meta.clone(), ClusterSpec { install_image: None, kubernetes_version: None }, ctx.clone())
            .await
            .unwrap();

        let (stored_meta, spec) = ctx.cluster_uuid.get("c1").unwrap();
        assert!(!spec.uuid.is_empty());
        assert_eq!(stored_meta.label(CLUSTER_UUID), Some(spec.uuid.as_str()));

        reconcile(meta, ClusterSpec { install_image: None, kubernetes_version: None }, ctx.clone())
            .await
            .unwrap();
        let (_, spec_again) = ctx.cluster_uuid.get("c1").unwrap();
        assert_eq!(spec.uuid, spec_again.uuid, "uuid must never change once set");
    }
}

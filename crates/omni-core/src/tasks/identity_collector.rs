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

//! Node identity collector task (spec §4.7): per cluster-machine,
//! collects node name, observed addresses, and etcd member id once the
//! node has joined etcd. The node-agent surface this core talks to has
//! no hostname or address-listing RPC (see DESIGN.md), so `node_name`
//! falls back to the cluster-machine id and `addresses` to the single
//! management address the machine already reports through; only the
//! etcd member id is genuinely observed, via `EtcdMemberList`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omni_resources::{Kind, Metadata, NodeIdentitySpec, TalosConfigSpec, TypedStore};
use omni_runtime::TaskSpec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::clients::TalosClients;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct IdentityCollectorTask {
    pub machine_id: String,
    pub cluster_id: String,
    pub management_address: String,
    pub node_identity: TypedStore<NodeIdentitySpec>,
    pub talos_config: TypedStore<TalosConfigSpec>,
    pub clients: Arc<TalosClients>,
}

#[async_trait]
impl TaskSpec for IdentityCollectorTask {
    fn id(&self) -> String {
        format!("identity-collector/{}", self.machine_id)
    }

    fn fingerprint(&self) -> String {
        format!("{}/{}", self.cluster_id, self.management_address)
    }

    #[instrument(skip(self, cancel), fields(machine = %self.machine_id))]
    async fn run_task(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut last_pushed: Option<NodeIdentitySpec> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.poll(&mut last_pushed).await,
            }
        }
    }
}

impl IdentityCollectorTask {
    async fn poll(&self, last_pushed: &mut Option<NodeIdentitySpec>) {
        let etcd_member_id = self.etcd_member_id().await;

        let next = NodeIdentitySpec {
            node_name: self.machine_id.clone(),
            addresses: vec![self.management_address.clone()],
            etcd_member_id,
        };

        if last_pushed.as_ref() == Some(&next) {
            return;
        }
        if let Err(e) = self.push(&next) {
            debug!(machine = %self.machine_id, error = %e, "failed to push node identity");
            return;
        }
        *last_pushed = Some(next);
    }

    /// Best-effort etcd membership lookup. There is no RPC that returns
    /// "this node's own" member id, so a unique single-member response is
    /// treated as this node's; anything else is left unresolved rather
    /// than guessed.
    async fn etcd_member_id(&self) -> Option<String> {
        let (_, talos_config) = self.talos_config.try_get(&self.cluster_id).ok()??;
        let config = omni_talos_client::TalosConfig {
            ca_pem: talos_config.ca_pem,
            crt_pem: talos_config.client_cert_pem,
            key_pem: talos_config.client_key_pem,
            endpoints: vec![self.management_address.clone()],
        };
        let client = self.clients.normal(&self.cluster_id, &config).await.ok()?;
        let mut guard = client.lock().await;
        let members = guard.etcd_member_list().await.ok()?;
        match members.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }

    fn push(&self, next: &NodeIdentitySpec) -> Result<(), omni_resources::StoreError> {
        match self.node_identity.try_get(&self.machine_id)? {
            Some((meta, _)) => {
                self.node_identity.update(&self.machine_id, meta.version, next.clone(), |_| {})?;
            }
            None => {
                let meta = Metadata::new("default", NodeIdentitySpec::KIND, self.machine_id.clone());
                self.node_identity.create(meta, next.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_cluster_or_address() {
        let task = IdentityCollectorTask {
            machine_id: "m1".into(),
            cluster_id: "c1".into(),
            management_address: "10.0.0.1:50000".into(),
            node_identity: TypedStore::new(omni_resources::InMemoryStore::new(), "default", "NodeIdentity"),
            talos_config: TypedStore::new(omni_resources::InMemoryStore::new(), "default", "TalosConfig"),
            clients: Arc::new(TalosClients::new(8, Duration::from_secs(60))),
        };
        assert_eq!(task.fingerprint(), "c1/10.0.0.1:50000");
        assert_eq!(task.id(), "identity-collector/m1");
    }
}

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

//! Machine info collector task (spec §4.7): maintains a Talos API client
//! for one machine and keeps `MachineStatus` in sync with what the node
//! actually reports. Polls `Version`/`SchematicInfo` at a short interval
//! (the node-agent catalogue this core watches boils down to those two
//! RPCs, see DESIGN.md) and pushes a deduplicated update only when
//! something changed. Transport failures are classified into the
//! semantic buckets spec §4.7 names so callers can tell "wrong
//! credentials" from "machine still booting" from "network blip".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omni_resources::{Kind, MachineStatusSpec, Metadata, Schematic, TypedStore};
use omni_runtime::TaskSpec;
use omni_talos_client::ClientError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::clients::TalosClients;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Transport-error classification (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineInfoError {
    NoAccess,
    TimeSkew,
    MaintenanceMismatch,
    Transient,
}

/// Classifies a client error into the semantic buckets the machine-info
/// collector reports (spec §4.7).
#[must_use]
pub fn classify(error: &ClientError) -> MachineInfoError {
    match error {
        ClientError::Rpc(status) => match status.code() {
            tonic::Code::PermissionDenied | tonic::Code::Unauthenticated => MachineInfoError::NoAccess,
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => MachineInfoError::Transient,
            _ => MachineInfoError::MaintenanceMismatch,
        },
        ClientError::Transport(e) => {
            let message = e.to_string();
            if message.contains("certificate") || message.contains("expired") {
                MachineInfoError::TimeSkew
            } else {
                MachineInfoError::Transient
            }
        }
        _ => MachineInfoError::Transient,
    }
}

pub struct MachineInfoTask {
    pub machine_id: String,
    pub management_address: String,
    pub machine_status: TypedStore<MachineStatusSpec>,
    pub clients: Arc<TalosClients>,
}

#[async_trait]
impl TaskSpec for MachineInfoTask {
    fn id(&self) -> String {
        format!("machine-info/{}", self.machine_id)
    }

    fn fingerprint(&self) -> String {
        self.management_address.clone()
    }

    #[instrument(skip(self, cancel), fields(machine = %self.machine_id))]
    async fn run_task(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut last_pushed: Option<MachineStatusSpec> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.poll(&mut last_pushed).await,
            }
        }
    }
}

impl MachineInfoTask {
    async fn poll(&self, last_pushed: &mut Option<MachineStatusSpec>) {
        let mut client = match self.clients.maintenance(&self.management_address).await {
            Ok(client) => client,
            Err(e) => {
                debug!(machine = %self.machine_id, error = %e, "machine info connect failed");
                return;
            }
        };

        let version = client.version().await;
        let schematic = client.schematic_info().await;

        match (version, schematic) {
            (Ok(talos_version), Ok(schematic)) => {
                let base = last_pushed.clone().unwrap_or_default();
                let next = MachineStatusSpec {
                    connected: true,
                    management_address: self.management_address.clone(),
                    talos_version,
                    schematic: Schematic {
                        id: schematic.id,
                        full_id: schematic.full_id,
                        invalid: schematic.invalid,
                        ..base.schematic
                    },
                    ..base
                };
                self.push_if_changed(last_pushed, next);
            }
            (Err(e), _) | (_, Err(e)) => {
                let kind = classify(&e);
                warn!(machine = %self.machine_id, ?kind, error = %e, "machine info poll failed");
                if let Some(mut status) = last_pushed.clone() {
                    if status.connected {
                        status.connected = false;
                        self.push_if_changed(last_pushed, status);
                    }
                }
            }
        }
    }

    fn push_if_changed(&self, last_pushed: &mut Option<MachineStatusSpec>, next: MachineStatusSpec) {
        if last_pushed.as_ref() == Some(&next) {
            return;
        }
        match self.machine_status.try_get(&self.machine_id) {
            Ok(Some((meta, _))) => {
                if let Err(e) = self.machine_status.update(&self.machine_id, meta.version, next.clone(), |_| {}) {
                    warn!(machine = %self.machine_id, error = %e, "failed to update machine status");
                    return;
                }
            }
            Ok(None) => {
                let meta = Metadata::new("default", MachineStatusSpec::KIND, self.machine_id.clone());
                if let Err(e) = self.machine_status.create(meta, next.clone()) {
                    warn!(machine = %self.machine_id, error = %e, "failed to create machine status");
                    return;
                }
            }
            Err(e) => {
                warn!(machine = %self.machine_id, error = %e, "failed to read machine status before update");
                return;
            }
        }
        *last_pushed = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_permission_denied_to_no_access() {
        let status = tonic::Status::new(tonic::Code::PermissionDenied, "nope");
        assert_eq!(classify(&ClientError::Rpc(status)), MachineInfoError::NoAccess);
    }

    #[test]
    fn classify_maps_unavailable_to_transient() {
        let status = tonic::Status::new(tonic::Code::Unavailable, "down");
        assert_eq!(classify(&ClientError::Rpc(status)), MachineInfoError::Transient);
    }
}

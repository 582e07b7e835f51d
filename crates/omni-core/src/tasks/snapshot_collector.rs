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

//! Machine status snapshot collector task (spec §4.7): per machine,
//! translates the stage + readiness this core already observes into a
//! `MachineStatusSnapshot` event. The node-agent catalogue has no COSI
//! `runtime.MachineStatus` watch of its own, so stage is derived from
//! `MachineStatus.connected`/`.maintenance`/`.system_disk_present`
//! instead of a live runtime feed (see DESIGN.md).

use std::time::Duration;

use async_trait::async_trait;
use omni_resources::{Kind, MachineStage, MachineStatusSnapshotSpec, MachineStatusSpec, Metadata, TypedStore};
use omni_runtime::TaskSpec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Derives a coarse lifecycle stage from the fields this core's
/// `MachineStatus` actually carries. Transitional stages the node-agent
/// catalogue cannot observe directly (`Rebooting`, `Resetting`,
/// `ShuttingDown`, `Upgrading`) are the controllers' own responsibility
/// to record elsewhere; this collector only distinguishes what
/// `MachineStatus` itself can tell us.
#[must_use]
pub fn derive_stage(spec: &MachineStatusSpec) -> MachineStage {
    if !spec.connected {
        return MachineStage::Unknown;
    }
    if spec.maintenance {
        return MachineStage::Maintenance;
    }
    if !spec.system_disk_present {
        return MachineStage::Installing;
    }
    MachineStage::Running
}

pub struct SnapshotCollectorTask {
    pub machine_id: String,
    pub machine_status: TypedStore<MachineStatusSpec>,
    pub machine_status_snapshot: TypedStore<MachineStatusSnapshotSpec>,
}

#[async_trait]
impl TaskSpec for SnapshotCollectorTask {
    fn id(&self) -> String {
        format!("snapshot-collector/{}", self.machine_id)
    }

    fn fingerprint(&self) -> String {
        self.machine_id.clone()
    }

    async fn run_task(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut last_pushed: Option<MachineStage> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.poll(&mut last_pushed).await,
            }
        }
    }
}

impl SnapshotCollectorTask {
    async fn poll(&self, last_pushed: &mut Option<MachineStage>) {
        let Ok(Some((_, status))) = self.machine_status.try_get(&self.machine_id) else {
            return;
        };
        let stage = derive_stage(&status);
        if *last_pushed == Some(stage) {
            return;
        }
        if let Err(e) = self.push(stage) {
            debug!(machine = %self.machine_id, error = %e, "failed to push machine status snapshot");
            return;
        }
        *last_pushed = Some(stage);
    }

    fn push(&self, stage: MachineStage) -> Result<(), omni_resources::StoreError> {
        let spec = MachineStatusSnapshotSpec { stage };
        match self.machine_status_snapshot.try_get(&self.machine_id)? {
            Some((meta, _)) => {
                self.machine_status_snapshot.update(&self.machine_id, meta.version, spec, |_| {})?;
            }
            None => {
                let meta = Metadata::new("default", MachineStatusSnapshotSpec::KIND, self.machine_id.clone());
                self.machine_status_snapshot.create(meta, spec)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_machine_has_unknown_stage() {
        let spec = MachineStatusSpec {
            connected: false,
            ..Default::default()
        };
        assert_eq!(derive_stage(&spec), MachineStage::Unknown);
    }

    #[test]
    fn connected_maintenance_machine_is_in_maintenance_stage() {
        let spec = MachineStatusSpec {
            connected: true,
            maintenance: true,
            ..Default::default()
        };
        assert_eq!(derive_stage(&spec), MachineStage::Maintenance);
    }

    #[test]
    fn connected_with_system_disk_is_running() {
        let spec = MachineStatusSpec {
            connected: true,
            maintenance: false,
            system_disk_present: true,
            ..Default::default()
        };
        assert_eq!(derive_stage(&spec), MachineStage::Running);
    }

    #[test]
    fn connected_without_system_disk_is_installing() {
        let spec = MachineStatusSpec {
            connected: true,
            maintenance: false,
            system_disk_present: false,
            ..Default::default()
        };
        assert_eq!(derive_stage(&spec), MachineStage::Installing);
    }
}

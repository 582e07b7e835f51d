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

use serde::{Deserialize, Serialize};

use crate::resource::Kind;

/// Binding of machine <-> cluster. Carries `ConfigUpdatePendingFinalizer`
/// (stored in `Metadata::finalizers`) while the config-status controller
/// holds a config-update slot for this machine (spec §3, §4.1.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterMachineSpec {
    pub machine_set: String,
}

impl Kind for ClusterMachineSpec {
    const KIND: &'static str = "ClusterMachine";
}

/// Desired machine config (spec §3). `config_bytes` is the compressed,
/// encoded configuration document; `generation_error` is set when
/// upstream generation failed and short-circuits reconciliation (spec
/// §4.1.1 step 1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterMachineConfigSpec {
    pub config_bytes: Vec<u8>,
    pub generation_error: Option<String>,
}

impl Kind for ClusterMachineConfigSpec {
    const KIND: &'static str = "ClusterMachineConfig";
}

/// Observed config status (output, spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterMachineConfigStatusSpec {
    pub cluster_machine_config_sha256: String,
    pub cluster_machine_config_version: String,
    pub talos_version: String,
    pub schematic_id: String,
    pub last_config_error: String,
    pub redacted_machine_config: Vec<u8>,
}

impl Kind for ClusterMachineConfigStatusSpec {
    const KIND: &'static str = "ClusterMachineConfigStatus";
}

/// An upgrade intent embedded in `MachinePendingUpdates` (spec §4.1.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingUpgrade {
    pub from_schematic: String,
    pub to_schematic: String,
    pub from_version: String,
    pub to_version: String,
}

/// Diff summary + pending upgrade intent surfaced to the UI (spec §3,
/// §4.1.6). Exists iff there is a config diff or an install-image drift
/// (invariant 8); otherwise the controller destroys it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachinePendingUpdatesSpec {
    pub config_diff: String,
    pub upgrade: Option<PendingUpgrade>,
}

impl Kind for MachinePendingUpdatesSpec {
    const KIND: &'static str = "MachinePendingUpdates";
}

/// Human or controller intent to skip graceful etcd-leave on reset (spec
/// §3, §4.1.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeForceDestroyRequestSpec {}

impl Kind for NodeForceDestroyRequestSpec {
    const KIND: &'static str = "NodeForceDestroyRequest";
}

/// 32-byte per-cluster-machine state-encryption key (spec §3, §4.4).
/// Immutable once `data` is non-empty (invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterMachineEncryptionKeySpec {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl Kind for ClusterMachineEncryptionKeySpec {
    const KIND: &'static str = "ClusterMachineEncryptionKey";
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

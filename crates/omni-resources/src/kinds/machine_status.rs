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

/// Both an "extensions-only" schematic id and a "full" id (including
/// kernel args) exist (GLOSSARY). `full_id` is authoritative when the
/// machine booted with UKI, or Talos >= 1.12 (spec §4.1.1 step 7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Schematic {
    pub id: String,
    pub full_id: String,
    pub invalid: bool,
    pub overlay: Option<String>,
    pub in_agent_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SecurityState {
    pub secure_boot: bool,
    pub booted_with_uki: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlatformMetadata {
    pub platform: String,
    pub region: Option<String>,
}

/// Node observed state (spec §3). The
/// `managed-by-static-infra-provider` label (read off `Metadata`) routes
/// readiness through `infra.MachineStatus.ReadyToUse` instead of
/// `connected` alone (spec §4.1.1 step 6); that external flag is modeled
/// here as `infra_ready_to_use` since the separate `infra` resource kind
/// it would otherwise live on is an out-of-scope collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineStatusSpec {
    pub connected: bool,
    pub management_address: String,
    pub talos_version: String,
    pub schematic: Schematic,
    pub platform_metadata: PlatformMetadata,
    pub security_state: SecurityState,
    pub maintenance: bool,
    pub infra_ready_to_use: Option<bool>,
    /// Whether the node reports an installed system disk (spec §4.2
    /// precondition for triggering a maintenance-mode upgrade).
    pub system_disk_present: bool,
}

impl Kind for MachineStatusSpec {
    const KIND: &'static str = "MachineStatus";
}

/// Machine lifecycle stage (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStage {
    Unknown,
    Booting,
    Running,
    Maintenance,
    Installing,
    Rebooting,
    Resetting,
    ShuttingDown,
    Upgrading,
}

impl Default for MachineStage {
    fn default() -> Self {
        MachineStage::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineStatusSnapshotSpec {
    pub stage: MachineStage,
}

impl Kind for MachineStatusSnapshotSpec {
    const KIND: &'static str = "MachineStatusSnapshot";
}

/// Pre-computed install image (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InstallImage {
    pub talos_version: String,
    pub schematic_id: String,
    pub schematic_initialized: bool,
    pub schematic_invalid: bool,
    pub platform: String,
    pub security_state: SecurityState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineConfigGenOptionsSpec {
    pub install_image: InstallImage,
}

impl Kind for MachineConfigGenOptionsSpec {
    const KIND: &'static str = "MachineConfigGenOptions";
}

/// Desired extra kernel args for a machine (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KernelArgsSpec {
    pub args: Vec<String>,
}

impl Kind for KernelArgsSpec {
    const KIND: &'static str = "KernelArgs";
}

/// Upgrade-status controller phase (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineUpgradeStatusPhase {
    Unknown,
    UpToDate,
    Pending,
    Upgrading,
}

impl Default for MachineUpgradeStatusPhase {
    fn default() -> Self {
        MachineUpgradeStatusPhase::Unknown
    }
}

/// Output of the upgrade-status controller (spec §4.2): tracks whether a
/// machine's installed schematic matches the one its `KernelArgs` imply,
/// and drives the maintenance-mode upgrade that corrects it.
/// `upgrading_since` backs the two-minute re-invocation cooldown once the
/// phase reaches `Upgrading`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineUpgradeStatusSpec {
    pub phase: MachineUpgradeStatusPhase,
    pub error: String,
    pub upgrading_since: Option<chrono::DateTime<chrono::Utc>>,
}

impl Kind for MachineUpgradeStatusSpec {
    const KIND: &'static str = "MachineUpgradeStatus";
}

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

/// Update strategy for a machine-set (spec §3). `Rolling` is the only
/// variant named by the spec; it is kept as an enum rather than a bare
/// string so new strategies are exhaustive-match failures, not silent
/// no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UpdateStrategy {
    Rolling,
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        UpdateStrategy::Rolling
    }
}

/// A machine-set: group of machines sharing an update strategy and role
/// (spec §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSetSpec {
    pub update_strategy: UpdateStrategy,
    /// Maximum number of machines that may hold the config-update slot
    /// concurrently (spec §4.1.5). Defaults to 1.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: u32,
}

fn default_max_parallelism() -> u32 {
    1
}

impl Default for MachineSetSpec {
    fn default() -> Self {
        Self {
            update_strategy: UpdateStrategy::default(),
            max_parallelism: default_max_parallelism(),
        }
    }
}

impl Kind for MachineSetSpec {
    const KIND: &'static str = "MachineSet";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MachineSetPhase {
    ScalingUp,
    Running,
    ScalingDown,
    Destroying,
}

/// Observed machine-set aggregate, including whether config updates are
/// currently allowed (spec §4.1.1 step 10).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSetStatusSpec {
    pub phase: MachineSetPhase,
    #[serde(default = "default_config_updates_allowed")]
    pub config_updates_allowed: bool,
}

fn default_config_updates_allowed() -> bool {
    true
}

impl Kind for MachineSetStatusSpec {
    const KIND: &'static str = "MachineSetStatus";
}

/// Binding of a machine to a machine-set; the `machine-locked` annotation
/// (read via `Metadata::annotation`) freezes a single node (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineSetNodeSpec {}

impl Kind for MachineSetNodeSpec {
    const KIND: &'static str = "MachineSetNode";
}

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

/// Declared cluster intent (spec §3). The `cluster-locked` annotation
/// freezes mutating reconciliation; `Metadata::phase` tracks teardown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    pub install_image: Option<String>,
    pub kubernetes_version: Option<String>,
}

impl Kind for ClusterSpec {
    const KIND: &'static str = "Cluster";
}

/// Observed cluster aggregate phase, surfaced for
/// `ClusterStatusMetrics` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterPhase {
    Unknown,
    ScalingUp,
    ScalingDown,
    Running,
    Destroying,
}

impl Default for ClusterPhase {
    fn default() -> Self {
        ClusterPhase::Unknown
    }
}

/// Observed aggregate (spec §3). `tainted_by_importing`/
/// `tainted_by_exporting` are store labels on this resource rather than
/// spec fields (matching spec's "labels `tainted-by-importing`,
/// `tainted-by-exporting`"); they are read via `Metadata::label` by
/// callers, so `ClusterStatusSpec` only carries the phase/counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatusSpec {
    pub phase: ClusterPhase,
    pub machines_count: u32,
    pub healthy_machines_count: u32,
    pub not_ready_count: u32,
}

impl Kind for ClusterStatusSpec {
    const KIND: &'static str = "ClusterStatus";
}

/// Random UUID, generated once and then immutable (spec §3 invariant 1,
/// §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterUuidSpec {
    pub uuid: String,
}

impl Kind for ClusterUuidSpec {
    const KIND: &'static str = "ClusterUUID";
}

/// PKI bundle + endpoints used to construct the Talos gRPC client for a
/// cluster (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TalosConfigSpec {
    pub ca_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

impl Kind for TalosConfigSpec {
    const KIND: &'static str = "TalosConfig";
}

/// Management addresses used to construct the Talos gRPC client (spec
/// §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterEndpointSpec {
    pub management_addresses: Vec<String>,
}

impl Kind for ClusterEndpointSpec {
    const KIND: &'static str = "ClusterEndpoint";
}

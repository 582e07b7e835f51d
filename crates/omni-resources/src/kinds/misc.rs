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

/// Ephemeral tick emitted periodically so certificate-consuming
/// controllers re-validate their outputs (spec §3, §4.5). `id` is the
/// emission timestamp rendered the same way the tick's own name is
/// derived, so consumers can order ticks lexically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CertRefreshTickSpec {
    pub emitted_at: String,
}

impl Kind for CertRefreshTickSpec {
    const KIND: &'static str = "CertRefreshTick";
}

/// The ephemeral namespace ticks and other non-persisted resources live
/// in (spec §4.5).
pub const EPHEMERAL_NAMESPACE: &str = "ephemeral";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Aggregate cluster-phase counts exported by `ClusterStatusMetrics`
/// (spec §4.6) as a resource so the metrics controller's own output is
/// observable through the store like everything else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterStatusMetricsSpec {
    pub unknown_count: u32,
    pub scaling_up_count: u32,
    pub scaling_down_count: u32,
    pub running_count: u32,
    pub destroying_count: u32,
    pub not_ready_count: u32,
}

impl Kind for ClusterStatusMetricsSpec {
    const KIND: &'static str = "ClusterStatusMetrics";
}

/// A request to pull one or more node images (spec §4.7 image-pull
/// task).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImagePullRequestSpec {
    pub nodes: Vec<String>,
    pub images: Vec<String>,
}

impl Kind for ImagePullRequestSpec {
    const KIND: &'static str = "ImagePullRequest";
}

/// Progress surfaced by the image-pull task for a single
/// `ImagePullRequest` (spec §4.7: "emits progress with (currentNum,
/// totalNum, node, image, error)").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImagePullStatusSpec {
    pub current_num: u32,
    pub total_num: u32,
    pub node: String,
    pub image: String,
    pub error: Option<String>,
}

impl Kind for ImagePullStatusSpec {
    const KIND: &'static str = "ImagePullStatus";
}

/// Consolidated node identity collected per cluster-machine (spec §4.7
/// identity collector task): node name, observed addresses, and etcd
/// member id once the node has joined etcd.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeIdentitySpec {
    pub node_name: String,
    pub addresses: Vec<String>,
    pub etcd_member_id: Option<String>,
}

impl Kind for NodeIdentitySpec {
    const KIND: &'static str = "NodeIdentity";
}

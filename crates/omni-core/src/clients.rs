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

//! Shared Talos API client construction (spec §4.1.1 step 2, §5): a
//! maintenance-mode client connects insecurely straight to a machine's
//! `ManagementAddress`; a normal-mode client is built from the cluster's
//! `TalosConfig` PKI bundle and cached per cluster in a TTL+LRU +
//! singleflight cache (`omni_talos_client::ClientCache`). Shared by the
//! config-status and upgrade-status controllers and the machine info
//! task so they all observe the same cached connections.

use std::sync::Arc;
use std::time::Duration;

use omni_talos_client::{ClientCache, ClientError, NodeClient, TalosConfig};
use tokio::sync::Mutex as AsyncMutex;

/// A clonable handle to a live, possibly-shared `NodeClient`.
pub type SharedNodeClient = Arc<AsyncMutex<NodeClient>>;

#[derive(Clone)]
pub struct TalosClients {
    cache: ClientCache<AsyncMutex<NodeClient>>,
}

impl TalosClients {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: ClientCache::new(capacity, ttl),
        }
    }

    /// Connects directly to a machine's maintenance-mode management
    /// address. Not cached: maintenance machines are ephemeral and each
    /// reconcile typically talks to at most one.
    pub async fn maintenance(&self, management_address: &str) -> Result<NodeClient, ClientError> {
        NodeClient::connect_maintenance(management_address).await
    }

    /// Returns the cached normal-mode client for `cluster_id`, building
    /// one from `talos_config` on a cache miss.
    pub async fn normal(&self, cluster_id: &str, talos_config: &TalosConfig) -> Result<SharedNodeClient, ClientError> {
        self.cache
            .get_or_connect(cluster_id, || async { Ok(AsyncMutex::new(NodeClient::connect(talos_config).await?)) })
            .await
    }

    /// Drops the cached client for `cluster_id`, forcing a rebuild on the
    /// next `normal` call. Wired to `ClusterEndpoint`/`TalosConfig`
    /// watches (spec §5).
    pub fn invalidate(&self, cluster_id: &str) {
        self.cache.invalidate(cluster_id);
    }

    #[must_use]
    pub fn metrics(&self) -> &omni_talos_client::CacheMetrics {
        self.cache.metrics()
    }
}

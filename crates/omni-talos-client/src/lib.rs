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

//! Node agent gRPC client, image factory HTTP client, and the per-cluster
//! client cache (spec §5, §6).

pub mod cache;
pub mod error;
pub mod image_factory;
pub mod node_client;

pub mod pb {
    tonic::include_proto!("omni.talos.machine");
}

pub use cache::{CacheMetrics, ClientCache};
pub use error::{ClientError, Result};
pub use image_factory::{ImageFactoryClient, InstallImageParams};
pub use node_client::{NodeClient, SchematicInfo, TalosConfig};

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

//! The reconciliation controllers (spec §4): the cluster-machine
//! config-status controller is the heart of the core (§4.1); the rest
//! are smaller collaborators that feed it or consume its output.

pub mod cert_refresh_tick;
pub mod cluster_status_metrics;
pub mod cluster_uuid;
pub mod config_status;
pub mod encryption_key;
pub mod upgrade_status;

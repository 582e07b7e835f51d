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

//! Concrete tasks run by `omni_runtime::TaskRunner` (spec §4.7): the
//! per-machine collectors that feed the controllers in `crate::controllers`,
//! plus the per-request image-pull task.

pub mod identity_collector;
pub mod image_pull;
pub mod machine_info;
pub mod snapshot_collector;

pub use identity_collector::IdentityCollectorTask;
pub use image_pull::ImagePullTask;
pub use machine_info::MachineInfoTask;
pub use snapshot_collector::SnapshotCollectorTask;

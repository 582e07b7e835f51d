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

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! The Omni reconciliation core: every controller in spec §4, the
//! validated-store wrapper, virtual-resource producers, concrete tasks,
//! per-machine bookkeeping, configuration and metrics.

pub mod bookkeeping;
pub mod clients;
pub mod config;
pub mod controllers;
pub mod error;
pub mod lock;
pub mod meta_keys;
pub mod metrics;
pub mod redact;
pub mod snapshot_name;
pub mod tasks;
pub mod validated_store;
pub mod version;
pub mod virtual_resources;

pub use bookkeeping::ResetBookkeeping;
pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use lock::ParallelismLock;
pub use metrics::Metrics;

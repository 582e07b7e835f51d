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

//! Core error type for the reconciliation controllers (spec §7). Mirrors
//! the teacher's `tasks::types::Error`: a flat enum of the failure kinds
//! this crate actually produces, with `anyhow` as the catch-all at
//! task/binary boundaries.

use omni_resources::StoreError;
use omni_talos_client::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("resource store error: {0}")]
    Store(#[from] StoreError),

    #[error("node agent client error: {0}")]
    Client(#[from] ClientError),

    #[error("config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config generation error: {0}")]
    ConfigGeneration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("general error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

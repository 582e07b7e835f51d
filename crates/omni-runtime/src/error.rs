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

//! Error taxonomy (spec §7): skip-reconcile, requeue-after, validation,
//! and fatal. Expressed as explicit variants rather than string matching
//! so the scheduler can dispatch on kind, not on message content.

use std::time::Duration;

use omni_resources::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Expected transient absence or wait condition ("cluster not
    /// found", "machine not connected", quota reached). The runtime
    /// requeues on the next input change; no state update happens.
    #[error("skip reconcile: {0}")]
    Skip(String),

    /// Explicit requeue delay, for conditions like "already resetting"
    /// or "upgrade in flight".
    #[error("requeue after {delay:?}: {reason}")]
    RequeueAfter { delay: Duration, reason: String },

    /// Surfaces as `InvalidArgument` at a hypothetical gRPC boundary;
    /// here it is just a typed variant validated-store hooks raise.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Anything else. The runtime applies backoff.
    #[error("fatal: {0}")]
    Fatal(#[from] anyhow::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        ReconcileError::Skip(reason.into())
    }

    #[must_use]
    pub fn requeue_after(delay: Duration, reason: impl Into<String>) -> Self {
        ReconcileError::RequeueAfter {
            delay,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, ReconcileError::Skip(_))
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

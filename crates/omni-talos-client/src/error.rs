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

//! Client-side error taxonomy (spec §6, §7): transport failures are
//! distinguished from the semantic outcomes the config-status controller
//! treats as "in sync" (`Unimplemented`/`FailedPrecondition` on upgrade,
//! `NotFound` on meta delete).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("node agent transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("node agent rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("image factory request failed: {0}")]
    ImageFactory(#[from] reqwest::Error),

    #[error("client configuration error: {0}")]
    Config(String),

    #[error("cache closed")]
    CacheClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// True for the node-agent statuses the config-status and
    /// upgrade-status controllers treat as "already in the desired state"
    /// rather than a failure (spec §4.1.3, §6).
    #[must_use]
    pub fn is_benign_on_upgrade(&self) -> bool {
        matches!(
            self,
            ClientError::Rpc(status)
                if matches!(status.code(), tonic::Code::Unimplemented | tonic::Code::FailedPrecondition)
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Rpc(status) if status.code() == tonic::Code::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unimplemented_and_failed_precondition_are_benign_on_upgrade() {
        assert!(ClientError::Rpc(tonic::Status::unimplemented("no maintenance upgrade")).is_benign_on_upgrade());
        assert!(ClientError::Rpc(tonic::Status::failed_precondition("busy")).is_benign_on_upgrade());
        assert!(!ClientError::Rpc(tonic::Status::unavailable("down")).is_benign_on_upgrade());
        assert!(!ClientError::CacheClosed.is_benign_on_upgrade());
    }

    #[test]
    fn not_found_is_only_true_for_that_code() {
        assert!(ClientError::Rpc(tonic::Status::not_found("no such key")).is_not_found());
        assert!(!ClientError::Rpc(tonic::Status::unimplemented("x")).is_not_found());
        assert!(!ClientError::CacheClosed.is_not_found());
    }
}

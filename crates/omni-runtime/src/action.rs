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

use std::time::Duration;

/// What the scheduler should do after a successful reconcile (spec §2.2:
/// "the runtime ... provides a requeue facility (fixed delay or
/// interval)"). Mirrors `kube::runtime::controller::Action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the given delay even if nothing else
    /// changes.
    Requeue(Duration),
    /// Do nothing until the next input change arrives from the store.
    AwaitChange,
}

impl Action {
    #[must_use]
    pub fn requeue(duration: Duration) -> Self {
        Action::Requeue(duration)
    }

    #[must_use]
    pub fn requeue_after_secs(secs: u64) -> Self {
        Action::Requeue(Duration::from_secs(secs))
    }

    #[must_use]
    pub fn await_change() -> Self {
        Action::AwaitChange
    }
}

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

use crate::metadata::ResourceId;

/// Store event kinds (spec §2.1): `{Created, Updated, Destroyed,
/// Bootstrapped, Errored, Noop}`.
#[derive(Debug, Clone)]
pub enum WatchEvent<S> {
    Created(ResourceId, S),
    Updated(ResourceId, S),
    Destroyed(ResourceId),
    /// Replayed on watch (re)connect to deliver the current state before
    /// live updates start flowing.
    Bootstrapped,
    Errored(String),
    /// Emitted for a write that did not change observable state, so
    /// requeue-driven controllers can distinguish "nothing happened" from
    /// a missed event.
    Noop(ResourceId),
}

impl<S> WatchEvent<S> {
    #[must_use]
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            WatchEvent::Created(id, _) | WatchEvent::Updated(id, _) | WatchEvent::Destroyed(id) | WatchEvent::Noop(id) => Some(id),
            WatchEvent::Bootstrapped | WatchEvent::Errored(_) => None,
        }
    }
}

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

//! The generic `Resource<Spec>` wrapper: metadata envelope plus a typed
//! spec payload. Output resources also carry a status; we model that as a
//! second type parameter so controllers can express "spec + status" kinds
//! the same way the teacher crate's `CustomResource` derive produces
//! `Foo` (spec) / `FooStatus` pairs.

use crate::metadata::Metadata;

pub trait Kind {
    /// Stable resource-type name used as the `kind` field and as the
    /// store's per-kind watch topic.
    const KIND: &'static str;
}

/// A single versioned object in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource<S> {
    pub metadata: Metadata,
    pub spec: S,
}

impl<S> Resource<S> {
    pub fn new(metadata: Metadata, spec: S) -> Self {
        Self { metadata, spec }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// A `Resource` whose spec also carries an observed status payload,
/// matching e.g. `ClusterMachineConfigStatus` which is both the resource
/// kind and the "status" of another resource's reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResource<S, T> {
    pub metadata: Metadata,
    pub spec: S,
    pub status: T,
}

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

//! Typed resource model and in-memory store for the Omni reconciliation
//! core. See SPEC_FULL.md §2/§3.

pub mod events;
pub mod kinds;
pub mod metadata;
pub mod resource;
pub mod store;

pub use events::WatchEvent;
pub use kinds::*;
pub use metadata::{well_known, Metadata, Phase, ResourceId};
pub use resource::{Kind, Resource};
pub use store::{cluster_identifying_labels, InMemoryStore, StoreError, StoredResource, TypedStore};

#[cfg(test)]
mod tests {
    use super::*;
    use kinds::cluster_machine::ClusterMachineConfigSpec;

    #[test]
    fn create_then_get_round_trips() {
        let store = InMemoryStore::new();
        let typed: TypedStore<ClusterMachineConfigSpec> =
            TypedStore::new(store, "default", "ClusterMachineConfig");

        let meta = Metadata::new("default", "ClusterMachineConfig", "machine-1");
        let spec = ClusterMachineConfigSpec {
            config_bytes: b"hello".to_vec(),
            generation_error: None,
        };
        typed.create(meta, spec.clone()).unwrap();

        let (meta, got) = typed.get("machine-1").unwrap();
        assert_eq!(got, spec);
        assert_eq!(meta.version, 1);
    }

    #[test]
    fn update_rejects_stale_version() {
        let store = InMemoryStore::new();
        let typed: TypedStore<ClusterMachineConfigSpec> =
            TypedStore::new(store, "default", "ClusterMachineConfig");
        let meta = Metadata::new("default", "ClusterMachineConfig", "machine-1");
        typed
            .create(
                meta,
                ClusterMachineConfigSpec {
                    config_bytes: vec![1],
                    generation_error: None,
                },
            )
            .unwrap();

        let err = typed
            .update(
                "machine-1",
                999,
                ClusterMachineConfigSpec {
                    config_bytes: vec![2],
                    generation_error: None,
                },
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn finalizer_blocks_physical_removal() {
        let store = InMemoryStore::new();
        let typed: TypedStore<ClusterMachineConfigSpec> =
            TypedStore::new(store, "default", "ClusterMachineConfig");
        let mut meta = Metadata::new("default", "ClusterMachineConfig", "machine-1");
        meta.add_finalizer("test.finalizer");
        typed
            .create(
                meta,
                ClusterMachineConfigSpec {
                    config_bytes: vec![],
                    generation_error: None,
                },
            )
            .unwrap();

        typed.destroy("machine-1", 1).unwrap();
        let err = typed.finalize_destroy("machine-1").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyTearingDown(_)));
    }
}

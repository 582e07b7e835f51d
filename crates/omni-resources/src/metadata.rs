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

//! The resource envelope shared by every kind in the store: namespace,
//! type, id, version, phase, owner, labels, annotations, finalizers and
//! timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two-phase resource lifecycle (spec §2.1): a resource is `Running` until
/// someone calls `Store::destroy`, at which point it moves to
/// `TearingDown` so that owning controllers can react (remove finalizers,
/// perform cleanup) before the store actually drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Running,
    TearingDown,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Running
    }
}

/// A fully-qualified resource identity: kind + namespace + id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub namespace: String,
    pub kind: String,
    pub id: String,
}

impl ResourceId {
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// Common envelope carried by every resource, mirroring spec §3:
/// `(namespace, type, id, version, phase, owner, labels, annotations,
/// finalizers, created, updated)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub namespace: String,
    pub kind: String,
    pub id: String,
    /// Monotonically increasing per-resource version, used for optimistic
    /// concurrency on `Update`/`Destroy`.
    pub version: u64,
    pub phase: Phase,
    /// Optional owning resource, used only as a GC hint in tests (see
    /// SPEC_FULL.md §3 supplement) — no cascading delete is implemented.
    pub owner: Option<ResourceId>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub finalizers: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Metadata {
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            id: id.into(),
            version: 0,
            phase: Phase::Running,
            owner: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            finalizers: Vec::new(),
            created: now,
            updated: now,
        }
    }

    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(self.namespace.clone(), self.kind.clone(), self.id.clone())
    }

    #[must_use]
    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }

    pub fn add_finalizer(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.has_finalizer(&name) {
            return false;
        }
        self.finalizers.push(name);
        true
    }

    pub fn remove_finalizer(&mut self, name: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != name);
        self.finalizers.len() != before
    }

    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Annotation/label constants used across controllers (spec §3/§4).
pub mod well_known {
    pub const CLUSTER_LOCKED: &str = "cluster-locked";
    pub const MACHINE_LOCKED: &str = "machine-locked";
    pub const CLUSTER_UUID: &str = "cluster-uuid";
    pub const TAINTED_BY_IMPORTING: &str = "tainted-by-importing";
    pub const TAINTED_BY_EXPORTING: &str = "tainted-by-exporting";
    pub const MANAGED_BY_STATIC_INFRA_PROVIDER: &str = "managed-by-static-infra-provider";
    pub const IS_CONTROL_PLANE: &str = "is-control-plane";
    pub const DISABLE_VALIDATION: &str = "disable-validation";

    pub const CONFIG_UPDATE_PENDING_FINALIZER: &str = "ConfigUpdatePendingFinalizer";

    /// Gates `ClusterMachineConfig` teardown until the config-status
    /// controller has finished resetting the node (spec §3 Lifecycle,
    /// §4.1.7).
    pub const CONFIG_STATUS_FINALIZER: &str = "ClusterMachineConfigStatusController.omni.sidero.dev";

    /// Gates `ClusterMachine` teardown until the encryption-key
    /// controller has finished with it (spec §4.4 "ignore teardown
    /// until" semantics, §3).
    pub const ENCRYPTION_KEY_FINALIZER: &str = "ClusterMachineEncryptionKeyController.omni.sidero.dev";

    pub const CLUSTER_NAME: &str = "cluster-name";
    pub const MACHINE_SET: &str = "machine-set";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_finalizer_is_idempotent() {
        let mut meta = Metadata::new("default", "Widget", "w1");
        assert!(meta.add_finalizer("f1"));
        assert!(!meta.add_finalizer("f1"));
        assert_eq!(meta.finalizers, vec!["f1".to_string()]);
    }

    #[test]
    fn remove_finalizer_reports_whether_it_was_present() {
        let mut meta = Metadata::new("default", "Widget", "w1");
        meta.add_finalizer("f1");
        assert!(meta.remove_finalizer("f1"));
        assert!(!meta.remove_finalizer("f1"));
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn label_and_annotation_lookup() {
        let mut meta = Metadata::new("default", "Widget", "w1");
        meta.labels.insert("k".into(), "v".into());
        meta.annotations.insert("a".into(), "b".into());
        assert_eq!(meta.label("k"), Some("v"));
        assert_eq!(meta.label("missing"), None);
        assert_eq!(meta.annotation("a"), Some("b"));
    }

    #[test]
    fn resource_id_round_trips_identity() {
        let meta = Metadata::new("default", "Widget", "w1");
        let id = meta.resource_id();
        assert_eq!(id.to_string(), "default/Widget/w1");
    }
}

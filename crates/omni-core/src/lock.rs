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

//! Cluster-wide update-parallelism lock (spec §4.1.5): bounds the number
//! of `ClusterMachine`s in a machine-set that may hold
//! `ConfigUpdatePendingFinalizer` concurrently. List-and-decide is
//! serialized by a single process-wide async mutex so concurrent workers
//! in the same process never overshoot `max_parallelism` (spec §5:
//! "acquisition is serialized by a controller-scoped mutex to make
//! list-and-decide atomic").

use omni_resources::well_known::CONFIG_UPDATE_PENDING_FINALIZER;
use omni_resources::{ClusterMachineSpec, TypedStore};
use tokio::sync::Mutex;

use crate::error::Result;

/// Outcome of an `acquire` attempt (spec §4.1.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Bootstrap: the machine has never been applied, the lock is
    /// bypassed entirely (step 1).
    BootstrapBypass,
    /// The finalizer was already held; nothing to do (step 2).
    AlreadyHeld,
    /// The finalizer was newly added (step 6).
    Acquired,
    /// The machine-set blocks config changes (step 3).
    ConfigUpdatesBlocked,
    /// The machine-set's quota is exhausted (step 5).
    QuotaReached,
}

impl AcquireOutcome {
    #[must_use]
    pub fn holds_slot(self) -> bool {
        matches!(self, AcquireOutcome::BootstrapBypass | AcquireOutcome::AlreadyHeld | AcquireOutcome::Acquired)
    }
}

/// Serializes `acquire` calls across the whole process so the
/// list-then-add sequence is atomic with respect to other reconciling
/// workers (spec §4.1.5 preamble, §5).
#[derive(Default)]
pub struct ParallelismLock {
    decision: Mutex<()>,
}

impl ParallelismLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the acquire algorithm (spec §4.1.5 steps 1-6) for
    /// `machine_name`, which belongs to `machine_set`, against
    /// `max_parallelism`.
    pub async fn acquire(
        &self,
        store: &TypedStore<ClusterMachineSpec>,
        machine_name: &str,
        machine_set: &str,
        max_parallelism: u32,
        never_applied: bool,
        config_updates_allowed: bool,
    ) -> Result<AcquireOutcome> {
        if never_applied {
            return Ok(AcquireOutcome::BootstrapBypass);
        }

        let _guard = self.decision.lock().await;

        let (metadata, spec) = store.get(machine_name)?;
        if metadata.has_finalizer(CONFIG_UPDATE_PENDING_FINALIZER) {
            return Ok(AcquireOutcome::AlreadyHeld);
        }
        if !config_updates_allowed {
            return Ok(AcquireOutcome::ConfigUpdatesBlocked);
        }

        let held = store
            .list()?
            .into_iter()
            .filter(|(m, s)| s.machine_set == machine_set && m.has_finalizer(CONFIG_UPDATE_PENDING_FINALIZER))
            .count();
        if held as u32 >= max_parallelism {
            return Ok(AcquireOutcome::QuotaReached);
        }

        let version = metadata.version;
        store.update(machine_name, version, spec, |m| {
            m.add_finalizer(CONFIG_UPDATE_PENDING_FINALIZER);
        })?;
        Ok(AcquireOutcome::Acquired)
    }

    /// Releases the config-update slot, idempotently (a machine without
    /// the finalizer is left untouched).
    pub fn release(&self, store: &TypedStore<ClusterMachineSpec>, machine_name: &str) -> Result<()> {
        let (metadata, spec) = store.get(machine_name)?;
        if !metadata.has_finalizer(CONFIG_UPDATE_PENDING_FINALIZER) {
            return Ok(());
        }
        let version = metadata.version;
        store.update(machine_name, version, spec, |m| {
            m.remove_finalizer(CONFIG_UPDATE_PENDING_FINALIZER);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::{InMemoryStore, Metadata};

    fn store() -> TypedStore<ClusterMachineSpec> {
        TypedStore::new(InMemoryStore::new(), "default", "ClusterMachine")
    }

    #[tokio::test]
    async fn bootstrap_bypasses_the_quota() {
        let store = store();
        store
            .create(Metadata::new("default", "ClusterMachine", "m1"), ClusterMachineSpec { machine_set: "ms1".into() })
            .unwrap();
        let lock = ParallelismLock::new();
        let outcome = lock.acquire(&store, "m1", "ms1", 1, true, true).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::BootstrapBypass);
        let (metadata, _) = store.get("m1").unwrap();
        assert!(!metadata.has_finalizer(CONFIG_UPDATE_PENDING_FINALIZER));
    }

    #[tokio::test]
    async fn enforces_max_parallelism_across_machine_set() {
        let store = store();
        for name in ["m1", "m2", "m3"] {
            store
                .create(Metadata::new("default", "ClusterMachine", name), ClusterMachineSpec { machine_set: "ms1".into() })
                .unwrap();
        }
        let lock = ParallelismLock::new();
        assert_eq!(lock.acquire(&store, "m1", "ms1", 1, false, true).await.unwrap(), AcquireOutcome::Acquired);
        assert_eq!(lock.acquire(&store, "m2", "ms1", 1, false, true).await.unwrap(), AcquireOutcome::QuotaReached);

        lock.release(&store, "m1").unwrap();
        assert_eq!(lock.acquire(&store, "m2", "ms1", 1, false, true).await.unwrap(), AcquireOutcome::Acquired);
    }

    #[tokio::test]
    async fn config_updates_blocked_short_circuits() {
        let store = store();
        store
            .create(Metadata::new("default", "ClusterMachine", "m1"), ClusterMachineSpec { machine_set: "ms1".into() })
            .unwrap();
        let lock = ParallelismLock::new();
        let outcome = lock.acquire(&store, "m1", "ms1", 1, false, false).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::ConfigUpdatesBlocked);
    }

    #[tokio::test]
    async fn already_held_is_idempotent() {
        let store = store();
        let mut meta = Metadata::new("default", "ClusterMachine", "m1");
        meta.add_finalizer(CONFIG_UPDATE_PENDING_FINALIZER);
        store.create(meta, ClusterMachineSpec { machine_set: "ms1".into() }).unwrap();
        let lock = ParallelismLock::new();
        assert_eq!(lock.acquire(&store, "m1", "ms1", 1, false, true).await.unwrap(), AcquireOutcome::AlreadyHeld);
    }
}

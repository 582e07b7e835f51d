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

//! Per-machine mutable bookkeeping the reset protocol needs across
//! reconciles (spec §4.1.7, §9): maintenance-probe retry counts, the
//! etcd-leave attempt ceiling, and the "is this machine's reset
//! graceful" decision the task-local state records once per machine.
//! Modeled as a small mutex-guarded map per spec §9's "interface-typed
//! service ... backed by a mapping from machine ID to a small counter
//! record".

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct MachineReset {
    maintenance_probe_attempts: u32,
    etcd_leave_attempts: u32,
    graceful: bool,
    ongoing: bool,
}

/// Tracks, per machine id: maintenance-mode reachability probe attempts
/// (ceiling `maintenanceCheckAttempts`), etcd-leave attempts (ceiling
/// `etcdLeaveAttemptsLimit`), whether the in-flight reset was decided to
/// be graceful, and whether a reset is currently "ongoing" (a
/// `ResetGeneric` call has been made and we're waiting to observe
/// `MAINTENANCE`).
#[derive(Default)]
pub struct ResetBookkeeping {
    machines: Mutex<HashMap<String, MachineReset>>,
}

impl ResetBookkeeping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this machine's reset as graceful, recorded once per reset
    /// attempt (spec §4.1.7 step 6: "true only if the task-local reset
    /// bookkeeping reports this machine as graceful").
    pub fn set_graceful(&self, machine_id: &str, graceful: bool) {
        self.machines.lock().entry(machine_id.to_string()).or_default().graceful = graceful;
    }

    #[must_use]
    pub fn is_graceful(&self, machine_id: &str) -> bool {
        self.machines.lock().get(machine_id).map(|m| m.graceful).unwrap_or(true)
    }

    /// Increments and returns the maintenance-probe attempt count for
    /// `machine_id`. Callers compare the returned value against
    /// `ResetConfig::maintenance_check_attempts`.
    pub fn record_maintenance_probe_attempt(&self, machine_id: &str) -> u32 {
        let mut machines = self.machines.lock();
        let entry = machines.entry(machine_id.to_string()).or_default();
        entry.maintenance_probe_attempts += 1;
        entry.maintenance_probe_attempts
    }

    #[must_use]
    pub fn maintenance_probe_attempts(&self, machine_id: &str) -> u32 {
        self.machines.lock().get(machine_id).map(|m| m.maintenance_probe_attempts).unwrap_or(0)
    }

    /// Increments and returns the etcd-leave attempt count for
    /// `machine_id`, enforcing the spec §4.1.7 step 9 ceiling (2).
    pub fn record_etcd_leave_attempt(&self, machine_id: &str) -> u32 {
        let mut machines = self.machines.lock();
        let entry = machines.entry(machine_id.to_string()).or_default();
        entry.etcd_leave_attempts += 1;
        entry.etcd_leave_attempts
    }

    #[must_use]
    pub fn etcd_leave_attempts(&self, machine_id: &str) -> u32 {
        self.machines.lock().get(machine_id).map(|m| m.etcd_leave_attempts).unwrap_or(0)
    }

    pub fn mark_ongoing(&self, machine_id: &str) {
        self.machines.lock().entry(machine_id.to_string()).or_default().ongoing = true;
    }

    #[must_use]
    pub fn is_ongoing(&self, machine_id: &str) -> bool {
        self.machines.lock().get(machine_id).map(|m| m.ongoing).unwrap_or(false)
    }

    /// Purges this machine's bookkeeping on final teardown (spec §4.1.7
    /// closing paragraph).
    pub fn purge(&self, machine_id: &str) {
        self.machines.lock().remove(machine_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_probe_attempts_count_up_to_ceiling() {
        let bk = ResetBookkeeping::new();
        for expected in 1..=5 {
            assert_eq!(bk.record_maintenance_probe_attempt("m1"), expected);
        }
        assert_eq!(bk.maintenance_probe_attempts("m1"), 5);
    }

    #[test]
    fn etcd_leave_attempts_tracked_per_machine() {
        let bk = ResetBookkeeping::new();
        assert_eq!(bk.record_etcd_leave_attempt("m1"), 1);
        assert_eq!(bk.record_etcd_leave_attempt("m1"), 2);
        assert_eq!(bk.etcd_leave_attempts("m2"), 0);
    }

    #[test]
    fn purge_resets_all_counters() {
        let bk = ResetBookkeeping::new();
        bk.record_etcd_leave_attempt("m1");
        bk.set_graceful("m1", false);
        bk.purge("m1");
        assert_eq!(bk.etcd_leave_attempts("m1"), 0);
        assert!(bk.is_graceful("m1"));
    }

    #[test]
    fn default_graceful_is_true_until_recorded_otherwise() {
        let bk = ResetBookkeeping::new();
        assert!(bk.is_graceful("unknown"));
        bk.set_graceful("m1", false);
        assert!(!bk.is_graceful("m1"));
    }
}

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

//! Generic supervised task runner (spec §4.7, §9): deduplicates
//! long-lived per-resource tasks by id, restarts on panic or returned
//! error with exponential backoff, isolates panics, and replaces a task
//! whose spec changed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// A long-lived task spec. `fingerprint` stands in for the Go
/// `Equal(other) bool` contract: two specs with the same id are
/// considered equivalent (no restart needed) iff their fingerprints
/// match, avoiding the need for `dyn Any` downcasting across task kinds.
#[async_trait]
pub trait TaskSpec: Send + Sync + 'static {
    fn id(&self) -> String;
    fn fingerprint(&self) -> String;
    async fn run_task(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

struct Running {
    fingerprint: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Backoff used between restarts of a failed/panicked task: exponential,
/// no elapsed-time cap (spec §4.7/§9).
#[derive(Debug, Clone, Copy)]
pub struct TaskBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for TaskBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
        }
    }
}

impl TaskBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(16));
        Duration::from_millis(exp.min(self.max.as_millis()) as u64)
    }
}

/// Owns the set of currently-running tasks, keyed by `TaskSpec::id`.
pub struct TaskRunner {
    tasks: Arc<parking_lot::Mutex<std::collections::HashMap<String, Running>>>,
    backoff: TaskBackoff,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(TaskBackoff::default())
    }
}

impl TaskRunner {
    #[must_use]
    pub fn new(backoff: TaskBackoff) -> Self {
        Self {
            tasks: Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new())),
            backoff,
        }
    }

    /// Drives the running set to `desired`: stops tasks not present,
    /// replaces tasks whose spec changed, starts tasks that are new.
    pub fn reconcile(&self, desired: Vec<Arc<dyn TaskSpec>>) {
        let desired_ids: HashSet<String> = desired.iter().map(|t| t.id()).collect();

        let stale: Vec<String> = {
            let tasks = self.tasks.lock();
            tasks.keys().filter(|id| !desired_ids.contains(*id)).cloned().collect()
        };
        for id in stale {
            self.stop_one(&id);
        }

        for spec in desired {
            let id = spec.id();
            let needs_restart = {
                let tasks = self.tasks.lock();
                match tasks.get(&id) {
                    Some(running) => running.fingerprint != spec.fingerprint(),
                    None => true,
                }
            };
            if needs_restart {
                self.stop_one(&id);
                self.start_one(spec);
            }
        }
    }

    fn start_one(&self, spec: Arc<dyn TaskSpec>) {
        let id = spec.id();
        let fingerprint = spec.fingerprint();
        let cancel = CancellationToken::new();
        let backoff = self.backoff;
        let task_cancel = cancel.clone();
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if task_cancel.is_cancelled() {
                    return;
                }
                let child_cancel = task_cancel.clone();
                let spec = spec.clone();
                let join = tokio::spawn(async move { spec.run_task(child_cancel).await });

                match join.await {
                    Ok(Ok(())) => {
                        if task_cancel.is_cancelled() {
                            return;
                        }
                        debug!(task_id = %task_id, "task returned Ok, restarting");
                        attempt = 0;
                    }
                    Ok(Err(e)) => {
                        warn!(task_id = %task_id, error = %e, attempt, "task returned error, restarting with backoff");
                        attempt += 1;
                    }
                    Err(join_err) if join_err.is_panic() => {
                        error!(task_id = %task_id, attempt, "task panicked, restarting with backoff");
                        attempt += 1;
                    }
                    Err(_) => {
                        // Task was cancelled mid-flight.
                        return;
                    }
                }

                if task_cancel.is_cancelled() {
                    return;
                }
                tokio::time::sleep(backoff.delay(attempt)).await;
            }
        });

        self.tasks.lock().insert(
            id,
            Running {
                fingerprint,
                cancel,
                handle,
            },
        );
    }

    fn stop_one(&self, id: &str) {
        if let Some(running) = self.tasks.lock().remove(id) {
            running.cancel.cancel();
            running.handle.abort();
        }
    }

    /// Stops every running task and waits for them to exit.
    pub async fn stop(&self) {
        let running: Vec<Running> = {
            let mut tasks = self.tasks.lock();
            tasks.drain().map(|(_, v)| v).collect()
        };
        for r in running {
            r.cancel.cancel();
            let _ = r.handle.await;
        }
    }

    #[must_use]
    pub fn running_ids(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }
}

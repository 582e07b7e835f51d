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

//! Controller-runtime contract (spec §2.2) and generic task runner (spec
//! §4.7) for the Omni reconciliation core.

pub mod action;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod task_runner;

pub use action::Action;
pub use controller::Controller;
pub use error::{ReconcileError, Result};
pub use finalizer::{finalizer, retry_update, FinalizerEvent};
pub use task_runner::{TaskBackoff, TaskRunner, TaskSpec};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct FlakyTask {
        id: String,
        fingerprint: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskSpec for FlakyTask {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn fingerprint(&self) -> String {
            self.fingerprint.clone()
        }
        async fn run_task(&self, cancel: CancellationToken) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                anyhow::bail!("first attempt fails");
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn restarts_failed_task_then_keeps_running() {
        let runner = TaskRunner::new(TaskBackoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let task: Arc<dyn TaskSpec> = Arc::new(FlakyTask {
            id: "m1".into(),
            fingerprint: "v1".into(),
            calls: calls.clone(),
        });
        runner.reconcile(vec![task]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(runner.running_ids(), vec!["m1".to_string()]);
        runner.stop().await;
    }

    #[tokio::test]
    async fn reconcile_drops_stale_tasks() {
        let runner = TaskRunner::new(TaskBackoff::default());
        let calls = Arc::new(AtomicUsize::new(1));
        let task: Arc<dyn TaskSpec> = Arc::new(FlakyTask {
            id: "m1".into(),
            fingerprint: "v1".into(),
            calls,
        });
        runner.reconcile(vec![task]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runner.running_ids(), vec!["m1".to_string()]);

        runner.reconcile(vec![]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(runner.running_ids().is_empty());
    }
}

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

//! Cluster-status metrics controller (spec §4.6): watches every
//! `ClusterStatus` and emits aggregate per-phase counts plus a
//! not-ready count, both as a `ClusterStatusMetrics` resource and as
//! Prometheus gauges. Rate-limited to at most once per 10s since a
//! change to any one cluster would otherwise trigger a full recompute.

use std::sync::Arc;
use std::time::{Duration, Instant};

use omni_resources::{ClusterPhase, ClusterStatusMetricsSpec, ClusterStatusSpec, Kind, Metadata, TypedStore};
use omni_runtime::{Action, Result};
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use crate::metrics::Metrics;

const SINGLETON_ID: &str = "cluster-status-metrics";

pub struct ClusterStatusMetricsContext {
    pub cluster_status: TypedStore<ClusterStatusSpec>,
    pub cluster_status_metrics: TypedStore<ClusterStatusMetricsSpec>,
    pub metrics: Arc<Metrics>,
    pub min_interval: Duration,
    last_run: AsyncMutex<Option<Instant>>,
}

impl ClusterStatusMetricsContext {
    #[must_use]
    pub fn new(
        cluster_status: TypedStore<ClusterStatusSpec>,
        cluster_status_metrics: TypedStore<ClusterStatusMetricsSpec>,
        metrics: Arc<Metrics>,
        min_interval: Duration,
    ) -> Self {
        Self {
            cluster_status,
            cluster_status_metrics,
            metrics,
            min_interval,
            last_run: AsyncMutex::new(None),
        }
    }
}

#[instrument(skip(_metadata, _spec, ctx))]
pub async fn reconcile(_metadata: Metadata, _spec: ClusterStatusSpec, ctx: Arc<ClusterStatusMetricsContext>) -> Result<Action> {
    {
        let mut last_run = ctx.last_run.lock().await;
        if let Some(last) = *last_run {
            let elapsed = last.elapsed();
            if elapsed < ctx.min_interval {
                return Ok(Action::requeue(ctx.min_interval - elapsed));
            }
        }
        *last_run = Some(Instant::now());
    }

    recompute(&ctx)?;
    Ok(Action::await_change())
}

fn recompute(ctx: &ClusterStatusMetricsContext) -> Result<()> {
    let all = ctx.cluster_status.list()?;
    let mut counts = ClusterStatusMetricsSpec::default();

    for (_, status) in &all {
        match status.phase {
            ClusterPhase::Unknown => counts.unknown_count += 1,
            ClusterPhase::ScalingUp => counts.scaling_up_count += 1,
            ClusterPhase::ScalingDown => counts.scaling_down_count += 1,
            ClusterPhase::Running => counts.running_count += 1,
            ClusterPhase::Destroying => counts.destroying_count += 1,
        }
        counts.not_ready_count += status.not_ready_count;
    }

    ctx.metrics.cluster_phase_count.with_label_values(&["UNKNOWN"]).set(f64::from(counts.unknown_count));
    ctx.metrics.cluster_phase_count.with_label_values(&["SCALING_UP"]).set(f64::from(counts.scaling_up_count));
    ctx.metrics.cluster_phase_count.with_label_values(&["SCALING_DOWN"]).set(f64::from(counts.scaling_down_count));
    ctx.metrics.cluster_phase_count.with_label_values(&["RUNNING"]).set(f64::from(counts.running_count));
    ctx.metrics.cluster_phase_count.with_label_values(&["DESTROYING"]).set(f64::from(counts.destroying_count));
    ctx.metrics.cluster_not_ready_count.set(i64::from(counts.not_ready_count));

    match ctx.cluster_status_metrics.try_get(SINGLETON_ID)? {
        Some((meta, _)) => {
            ctx.cluster_status_metrics.update(SINGLETON_ID, meta.version, counts, |_| {})?;
        }
        None => {
            let meta = Metadata::new("default", ClusterStatusMetricsSpec::KIND, SINGLETON_ID);
            ctx.cluster_status_metrics.create(meta, counts)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::InMemoryStore;

    fn ctx() -> Arc<ClusterStatusMetricsContext> {
        Arc::new(ClusterStatusMetricsContext::new(
            TypedStore::new(InMemoryStore::new(), "default", "ClusterStatus"),
            TypedStore::new(InMemoryStore::new(), "default", "ClusterStatusMetrics"),
            Arc::new(Metrics::new()),
            Duration::from_millis(10),
        ))
    }

    #[tokio::test]
    async fn aggregates_counts_across_clusters() {
        let ctx = ctx();
        ctx.cluster_status
            .create(
                Metadata::new("default", "ClusterStatus", "c1"),
                ClusterStatusSpec { phase: ClusterPhase::Running, machines_count: 3, healthy_machines_count: 3, not_ready_count: 0 },
            )
            .unwrap();
        ctx.cluster_status
            .create(
                Metadata::new("default", "ClusterStatus", "c2"),
                ClusterStatusSpec { phase: ClusterPhase::ScalingUp, machines_count: 2, healthy_machines_count: 1, not_ready_count: 1 },
            )
            .unwrap();

        reconcile(Metadata::new("default", "ClusterStatus", "c1"), ClusterStatusSpec { phase: ClusterPhase::Running, machines_count: 3, healthy_machines_count: 3, not_ready_count: 0 }, ctx.clone())
            .await
            .unwrap();

        let (_, metrics) = ctx.cluster_status_metrics.get(SINGLETON_ID).unwrap();
        assert_eq!(metrics.running_count, 1);
        assert_eq!(metrics.scaling_up_count, 1);
        assert_eq!(metrics.not_ready_count, 1);
        assert_eq!(ctx.metrics.cluster_phase_count.with_label_values(&["RUNNING"]).get(), 1.0);
    }

    #[tokio::test]
    async fn rate_limits_recompute_within_min_interval() {
        let ctx = ctx();
        let spec = ClusterStatusSpec { phase: ClusterPhase::Running, machines_count: 1, healthy_machines_count: 1, not_ready_count: 0 };
        let meta = Metadata::new("default", "ClusterStatus", "c1");

        let first = reconcile(meta.clone(), spec.clone(), ctx.clone()).await.unwrap();
        assert_eq!(first, Action::await_change());

        let second = reconcile(meta, spec, ctx.clone()).await.unwrap();
        assert!(matches!(second, Action::Requeue(_)));
    }
}

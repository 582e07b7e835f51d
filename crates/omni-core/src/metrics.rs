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

//! Prometheus metrics registry shared by `ClusterStatusMetrics` (spec
//! §4.6) and the Talos client cache's hit/miss/eviction counters (spec
//! §4 supplement). Scoped to a plain `prometheus` exporter, matching the
//! pack's `eosin-platform-eosin` style rather than the teacher's fuller
//! OpenTelemetry wiring, since this crate only needs gauges/counters.

use prometheus::{GaugeVec, IntCounterVec, IntGauge, Opts, Registry};

/// Gauges/counters exported by the controller-manager's `/metrics`
/// endpoint.
pub struct Metrics {
    pub registry: Registry,
    pub cluster_phase_count: GaugeVec,
    pub cluster_not_ready_count: IntGauge,
    pub client_cache_events: IntCounterVec,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let cluster_phase_count = GaugeVec::new(
            Opts::new("omni_cluster_phase_count", "Number of clusters currently in each phase"),
            &["phase"],
        )
        .expect("valid metric");
        let cluster_not_ready_count = IntGauge::new(
            "omni_cluster_not_ready_count",
            "Total count of not-ready machines across all clusters",
        )
        .expect("valid metric");
        let client_cache_events = IntCounterVec::new(
            Opts::new("omni_talos_client_cache_events_total", "Talos client cache hit/miss/eviction counts"),
            &["event"],
        )
        .expect("valid metric");

        registry.register(Box::new(cluster_phase_count.clone())).expect("register");
        registry.register(Box::new(cluster_not_ready_count.clone())).expect("register");
        registry.register(Box::new(client_cache_events.clone())).expect("register");

        Self {
            registry,
            cluster_phase_count,
            cluster_not_ready_count,
            client_cache_events,
        }
    }

    /// Pulls the latest hit/miss/eviction totals from a `ClientCache`'s
    /// `CacheMetrics` into the exported counters. Counters are monotonic
    /// in `prometheus`, so this resets them to the cache's own running
    /// totals rather than incrementing by a delta.
    pub fn sync_client_cache(&self, cache_metrics: &omni_talos_client::CacheMetrics) {
        let hits = self.client_cache_events.with_label_values(&["hit"]);
        let misses = self.client_cache_events.with_label_values(&["miss"]);
        let evictions = self.client_cache_events.with_label_values(&["eviction"]);
        reset_counter_to(&hits, cache_metrics.hits());
        reset_counter_to(&misses, cache_metrics.misses());
        reset_counter_to(&evictions, cache_metrics.evictions());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn reset_counter_to(counter: &prometheus::IntCounter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_panic_and_exposes_gauges() {
        let metrics = Metrics::new();
        metrics.cluster_phase_count.with_label_values(&["RUNNING"]).set(3.0);
        metrics.cluster_not_ready_count.set(1);
        assert_eq!(metrics.cluster_phase_count.with_label_values(&["RUNNING"]).get(), 3.0);
    }
}

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

//! Cert-refresh tick controller (spec §4.5): no resource inputs, just a
//! clock. Periodically emits a `CertRefreshTick` in the ephemeral
//! namespace so certificate-consuming controllers re-evaluate staleness.
//! Unlike the rest of §4, this has no reconcile input type to watch, so
//! it runs as its own supervised loop rather than through
//! `omni_runtime::Controller`.

use std::sync::Arc;
use std::time::Duration;

use omni_resources::{CertRefreshTickSpec, Kind, Metadata, TypedStore, EPHEMERAL_NAMESPACE};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

pub struct CertRefreshTickContext {
    pub cert_refresh_tick: TypedStore<CertRefreshTickSpec>,
    pub interval: Duration,
}

#[instrument(skip(ctx, cancel))]
pub async fn run(ctx: Arc<CertRefreshTickContext>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => emit_tick(&ctx),
        }
    }
}

fn emit_tick(ctx: &CertRefreshTickContext) {
    let id = chrono::Utc::now().to_rfc3339();
    let meta = Metadata::new(EPHEMERAL_NAMESPACE, CertRefreshTickSpec::KIND, id.clone());
    if let Err(e) = ctx.cert_refresh_tick.create(meta, CertRefreshTickSpec { emitted_at: id }) {
        warn!(error = %e, "failed to emit cert refresh tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_resources::InMemoryStore;

    #[test]
    fn emit_tick_creates_a_resource_in_the_ephemeral_namespace() {
        let ctx = CertRefreshTickContext {
            cert_refresh_tick: TypedStore::new(InMemoryStore::new(), EPHEMERAL_NAMESPACE, "CertRefreshTick"),
            interval: Duration::from_secs(3600),
        };
        emit_tick(&ctx);
        let ticks = ctx.cert_refresh_tick.list().unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].0.namespace, EPHEMERAL_NAMESPACE);
        assert_eq!(ticks[0].1.emitted_at, ticks[0].0.id);
    }
}

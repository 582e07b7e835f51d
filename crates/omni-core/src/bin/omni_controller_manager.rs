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

//! Entry point for the reconciliation core: wires every controller (spec
//! §4.1-§4.6) onto one shared in-memory store, starts the task runner
//! for the per-machine collectors and the image-pull task (spec §4.7),
//! and runs until terminated.

use std::sync::Arc;
use std::time::Duration;

use omni_core::bookkeeping::ResetBookkeeping;
use omni_core::clients::TalosClients;
use omni_core::config::{defaults, ControllerConfig};
use omni_core::controllers::{
    cert_refresh_tick, cluster_status_metrics, cluster_uuid, config_status, encryption_key, upgrade_status,
};
use omni_core::lock::ParallelismLock;
use omni_core::metrics::Metrics;
use omni_core::tasks::{IdentityCollectorTask, ImagePullTask, MachineInfoTask, SnapshotCollectorTask};
use omni_resources::well_known::CLUSTER_NAME;
use omni_resources::{
    CertRefreshTickSpec, ClusterEndpointSpec, ClusterMachineConfigSpec, ClusterMachineConfigStatusSpec,
    ClusterMachineEncryptionKeySpec, ClusterMachineSpec, ClusterSpec, ClusterStatusMetricsSpec, ClusterStatusSpec,
    ClusterUuidSpec, ImagePullRequestSpec, ImagePullStatusSpec, InMemoryStore, Kind, KernelArgsSpec,
    MachineConfigGenOptionsSpec, MachinePendingUpdatesSpec, MachineSetNodeSpec, MachineSetSpec, MachineSetStatusSpec,
    MachineStatusSnapshotSpec, MachineStatusSpec, MachineUpgradeStatusSpec, NodeForceDestroyRequestSpec,
    NodeIdentitySpec, TalosConfigSpec, TypedStore, DEFAULT_NAMESPACE, EPHEMERAL_NAMESPACE,
};
use omni_runtime::{Controller, TaskBackoff, TaskRunner, TaskSpec};
use omni_talos_client::ImageFactoryClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often the live machine/request set is re-scanned to recompute the
/// desired task set (spec §4.7 doesn't name an interval; this mirrors
/// the controller-runtime's own resync cadence rather than a sub-second
/// poll).
const TASK_RECONCILE_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config_path = std::env::var("OMNI_CONTROLLER_CONFIG").unwrap_or_else(|_| "/etc/omni/controller-config.yaml".to_string());
    let config = match ControllerConfig::from_mounted_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, config_path, "falling back to default controller configuration");
            ControllerConfig::default()
        }
    };

    let store = InMemoryStore::new();
    let metrics = Arc::new(Metrics::new());
    let clients = Arc::new(TalosClients::new(config.client_cache.capacity, config.client_cache.ttl()));
    let image_factory = ImageFactoryClient::new(config.image_factory.host.clone());
    let lock = Arc::new(ParallelismLock::new());
    let bookkeeping = Arc::new(ResetBookkeeping::new());

    let cluster: TypedStore<ClusterSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterSpec::KIND);
    let cluster_status: TypedStore<ClusterStatusSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterStatusSpec::KIND);
    let cluster_status_metrics_store: TypedStore<ClusterStatusMetricsSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterStatusMetricsSpec::KIND);
    let cluster_uuid_store: TypedStore<ClusterUuidSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterUuidSpec::KIND);
    let cluster_endpoint: TypedStore<ClusterEndpointSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterEndpointSpec::KIND);
    let talos_config: TypedStore<TalosConfigSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, TalosConfigSpec::KIND);

    let cluster_machine: TypedStore<ClusterMachineSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterMachineSpec::KIND);
    let cluster_machine_config: TypedStore<ClusterMachineConfigSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterMachineConfigSpec::KIND);
    let cluster_machine_config_status: TypedStore<ClusterMachineConfigStatusSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterMachineConfigStatusSpec::KIND);
    let cluster_machine_encryption_key: TypedStore<ClusterMachineEncryptionKeySpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ClusterMachineEncryptionKeySpec::KIND);
    let pending_updates: TypedStore<MachinePendingUpdatesSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachinePendingUpdatesSpec::KIND);
    let node_force_destroy_request: TypedStore<NodeForceDestroyRequestSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, NodeForceDestroyRequestSpec::KIND);

    let machine_set: TypedStore<MachineSetSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineSetSpec::KIND);
    let machine_set_status: TypedStore<MachineSetStatusSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineSetStatusSpec::KIND);
    let machine_set_node: TypedStore<MachineSetNodeSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineSetNodeSpec::KIND);

    let machine_status: TypedStore<MachineStatusSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineStatusSpec::KIND);
    let machine_status_snapshot: TypedStore<MachineStatusSnapshotSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineStatusSnapshotSpec::KIND);
    let machine_config_gen_options: TypedStore<MachineConfigGenOptionsSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineConfigGenOptionsSpec::KIND);
    let kernel_args: TypedStore<KernelArgsSpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, KernelArgsSpec::KIND);
    let machine_upgrade_status: TypedStore<MachineUpgradeStatusSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, MachineUpgradeStatusSpec::KIND);

    let cert_refresh_tick_store: TypedStore<CertRefreshTickSpec> =
        TypedStore::new(store.clone(), EPHEMERAL_NAMESPACE, CertRefreshTickSpec::KIND);

    let image_pull_request: TypedStore<ImagePullRequestSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ImagePullRequestSpec::KIND);
    let image_pull_status: TypedStore<ImagePullStatusSpec> =
        TypedStore::new(store.clone(), DEFAULT_NAMESPACE, ImagePullStatusSpec::KIND);
    let node_identity: TypedStore<NodeIdentitySpec> = TypedStore::new(store.clone(), DEFAULT_NAMESPACE, NodeIdentitySpec::KIND);

    let cancel = CancellationToken::new();

    let config_status_ctx = Arc::new(config_status::ConfigStatusContext {
        cluster: cluster.clone(),
        cluster_machine: cluster_machine.clone(),
        cluster_machine_config: cluster_machine_config.clone(),
        cluster_machine_config_status: cluster_machine_config_status.clone(),
        machine_set: machine_set.clone(),
        machine_set_status: machine_set_status.clone(),
        machine_set_node: machine_set_node.clone(),
        machine_status: machine_status.clone(),
        machine_status_snapshot: machine_status_snapshot.clone(),
        machine_config_gen_options: machine_config_gen_options.clone(),
        pending_updates: pending_updates.clone(),
        node_force_destroy_request: node_force_destroy_request.clone(),
        talos_config: talos_config.clone(),
        cluster_endpoint: cluster_endpoint.clone(),
        clients: clients.clone(),
        image_factory: image_factory.clone(),
        lock: lock.clone(),
        bookkeeping: bookkeeping.clone(),
        config: config.clone(),
    });
    tokio::spawn(
        Controller::new(cluster_machine_config.clone(), config.parallelism.config_status_workers)
            .run(config_status_ctx, config_status::reconcile),
    );

    let upgrade_status_ctx = Arc::new(upgrade_status::UpgradeStatusContext {
        machine_config_gen_options: machine_config_gen_options.clone(),
        kernel_args: kernel_args.clone(),
        machine_upgrade_status: machine_upgrade_status.clone(),
        clients: clients.clone(),
        image_factory: image_factory.clone(),
        config: config.clone(),
    });
    tokio::spawn(Controller::new(machine_status.clone(), 4).run(upgrade_status_ctx, upgrade_status::reconcile));

    let cluster_uuid_ctx = Arc::new(cluster_uuid::ClusterUuidContext {
        cluster_uuid: cluster_uuid_store.clone(),
    });
    tokio::spawn(Controller::new(cluster.clone(), 2).run(cluster_uuid_ctx, cluster_uuid::reconcile));

    let encryption_key_ctx = Arc::new(encryption_key::EncryptionKeyContext {
        cluster_machine: cluster_machine.clone(),
        encryption_key: cluster_machine_encryption_key.clone(),
    });
    tokio::spawn(Controller::new(cluster_machine.clone(), 4).run(encryption_key_ctx, encryption_key::reconcile));

    let cluster_status_metrics_ctx = Arc::new(cluster_status_metrics::ClusterStatusMetricsContext::new(
        cluster_status.clone(),
        cluster_status_metrics_store.clone(),
        metrics.clone(),
        defaults::CLUSTER_METRICS_MIN_INTERVAL,
    ));
    tokio::spawn(Controller::new(cluster_status.clone(), 1).run(cluster_status_metrics_ctx, cluster_status_metrics::reconcile));

    let cert_refresh_ctx = Arc::new(cert_refresh_tick::CertRefreshTickContext {
        cert_refresh_tick: cert_refresh_tick_store.clone(),
        interval: Duration::from_secs(config.cert_refresh_tick_interval_secs),
    });
    tokio::spawn(cert_refresh_tick::run(cert_refresh_ctx, cancel.clone()));

    let task_runner = Arc::new(TaskRunner::new(TaskBackoff::default()));
    tokio::spawn(run_task_reconciler(
        task_runner,
        cluster_machine,
        machine_status,
        machine_status_snapshot,
        node_identity,
        talos_config,
        image_pull_request,
        image_pull_status,
        clients,
    ));

    info!("omni-controller-manager started");
    std::future::pending::<()>().await;
    Ok(())
}

/// Keeps the task runner's live set in sync with the machines and
/// image-pull requests currently in the store. Unlike the controllers
/// above, tasks aren't driven by a single resource's watch stream — a
/// machine's task set depends on fields from several kinds at once — so
/// this periodically rebuilds the full desired set and lets
/// `TaskRunner::reconcile` diff it (spec §4.7).
#[allow(clippy::too_many_arguments)]
async fn run_task_reconciler(
    task_runner: Arc<TaskRunner>,
    cluster_machine: TypedStore<ClusterMachineSpec>,
    machine_status: TypedStore<MachineStatusSpec>,
    machine_status_snapshot: TypedStore<MachineStatusSnapshotSpec>,
    node_identity: TypedStore<NodeIdentitySpec>,
    talos_config: TypedStore<TalosConfigSpec>,
    image_pull_request: TypedStore<ImagePullRequestSpec>,
    image_pull_status: TypedStore<ImagePullStatusSpec>,
    clients: Arc<TalosClients>,
) {
    let mut ticker = tokio::time::interval(TASK_RECONCILE_INTERVAL);
    loop {
        ticker.tick().await;

        let machines = match machine_status.list() {
            Ok(machines) => machines,
            Err(e) => {
                warn!(error = %e, "failed to list machine status for task reconciliation");
                continue;
            }
        };
        let requests = match image_pull_request.list() {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "failed to list image pull requests for task reconciliation");
                continue;
            }
        };

        let mut desired: Vec<Arc<dyn TaskSpec>> = Vec::with_capacity(machines.len() * 3 + requests.len());

        for (meta, status) in &machines {
            if status.management_address.is_empty() {
                continue;
            }
            let machine_id = meta.id.clone();

            desired.push(Arc::new(MachineInfoTask {
                machine_id: machine_id.clone(),
                management_address: status.management_address.clone(),
                machine_status: machine_status.clone(),
                clients: clients.clone(),
            }));

            desired.push(Arc::new(SnapshotCollectorTask {
                machine_id: machine_id.clone(),
                machine_status: machine_status.clone(),
                machine_status_snapshot: machine_status_snapshot.clone(),
            }));

            let cluster_id = cluster_machine
                .get(&machine_id)
                .ok()
                .and_then(|(m, _)| m.label(CLUSTER_NAME).map(str::to_string));
            if let Some(cluster_id) = cluster_id {
                desired.push(Arc::new(IdentityCollectorTask {
                    machine_id,
                    cluster_id,
                    management_address: status.management_address.clone(),
                    node_identity: node_identity.clone(),
                    talos_config: talos_config.clone(),
                    clients: clients.clone(),
                }));
            }
        }

        for (meta, request) in &requests {
            let management_addresses: Vec<String> = request
                .nodes
                .iter()
                .map(|node| {
                    machine_status
                        .try_get(node)
                        .ok()
                        .flatten()
                        .map(|(_, s)| s.management_address)
                        .unwrap_or_default()
                })
                .collect();
            desired.push(Arc::new(ImagePullTask {
                request_id: meta.id.clone(),
                request: request.clone(),
                management_addresses,
                status: image_pull_status.clone(),
                clients: clients.clone(),
            }));
        }

        task_runner.reconcile(desired);
    }
}

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

//! The cluster-machine config-status controller (spec §4.1): the heart of
//! the reconciliation core. For every `ClusterMachineConfig` it drives the
//! corresponding node towards the desired configuration — upgrading image
//! and schematic when required, applying configuration, respecting
//! cluster/machine locks and machine-set update parallelism — and resets
//! the node on teardown.

use std::sync::Arc;
use std::time::Duration;

use omni_resources::well_known::{
    CLUSTER_LOCKED, CONFIG_STATUS_FINALIZER, IS_CONTROL_PLANE, MACHINE_LOCKED,
};
use omni_resources::{
    cluster_identifying_labels, ClusterEndpointSpec, ClusterMachineConfigSpec,
    ClusterMachineConfigStatusSpec, ClusterMachineSpec, ClusterSpec, InstallImage,
    MachineConfigGenOptionsSpec, MachinePendingUpdatesSpec, MachineSetNodeSpec, MachineSetPhase,
    MachineSetSpec, MachineSetStatusSpec, MachineStage, MachineStatusSnapshotSpec,
    MachineStatusSpec, Metadata, NodeForceDestroyRequestSpec, Phase, PendingUpgrade,
    TalosConfigSpec, TypedStore,
};
use omni_runtime::finalizer::{finalizer, FinalizerEvent};
use omni_runtime::{Action, ReconcileError, Result};
use omni_talos_client::{ImageFactoryClient, InstallImageParams, NodeClient};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::bookkeeping::ResetBookkeeping;
use crate::clients::TalosClients;
use crate::config::{defaults, ControllerConfig};
use crate::lock::{AcquireOutcome, ParallelismLock};
use crate::meta_keys::STATE_ENCRYPTION_CONFIG;
use crate::redact::{config_diff, redact_machine_config};
use crate::version::{at_least, should_stage_upgrade};

pub struct ConfigStatusContext {
    pub cluster: TypedStore<ClusterSpec>,
    pub cluster_machine: TypedStore<ClusterMachineSpec>,
    pub cluster_machine_config: TypedStore<ClusterMachineConfigSpec>,
    pub cluster_machine_config_status: TypedStore<ClusterMachineConfigStatusSpec>,
    pub machine_set: TypedStore<MachineSetSpec>,
    pub machine_set_status: TypedStore<MachineSetStatusSpec>,
    pub machine_set_node: TypedStore<MachineSetNodeSpec>,
    pub machine_status: TypedStore<MachineStatusSpec>,
    pub machine_status_snapshot: TypedStore<MachineStatusSnapshotSpec>,
    pub machine_config_gen_options: TypedStore<MachineConfigGenOptionsSpec>,
    pub pending_updates: TypedStore<MachinePendingUpdatesSpec>,
    pub node_force_destroy_request: TypedStore<NodeForceDestroyRequestSpec>,
    pub talos_config: TypedStore<TalosConfigSpec>,
    pub cluster_endpoint: TypedStore<ClusterEndpointSpec>,
    pub clients: Arc<TalosClients>,
    pub image_factory: ImageFactoryClient,
    pub lock: Arc<ParallelismLock>,
    pub bookkeeping: Arc<ResetBookkeeping>,
    pub config: ControllerConfig,
}

#[instrument(skip(spec, ctx), fields(machine = %metadata.id))]
pub async fn reconcile(metadata: Metadata, spec: ClusterMachineConfigSpec, ctx: Arc<ConfigStatusContext>) -> Result<Action> {
    let store = ctx.cluster_machine_config.clone();
    finalizer(&store, CONFIG_STATUS_FINALIZER, metadata, spec, move |event| {
        let ctx = ctx.clone();
        async move {
            match event {
                FinalizerEvent::Apply(metadata, spec) => apply(metadata, spec, ctx).await,
                FinalizerEvent::Cleanup(metadata, spec) => cleanup(metadata, spec, ctx).await,
            }
        }
    })
    .await
}

/// Everything built from the store before the transform runs (spec
/// §4.1.1).
struct ReconciliationContext {
    machine_id: String,
    desired_bytes: Vec<u8>,
    desired_config_version: u64,
    last_config_error: String,
    locked: bool,
    redacted_machine_config: Vec<u8>,
    machine_set: MachineSetSpec,
    machine_set_status: MachineSetStatusSpec,
    cluster_machine: ClusterMachineSpec,
    machine_status: MachineStatusSpec,
    snapshot_stage: MachineStage,
    install_image: InstallImage,
    existing_status: ClusterMachineConfigStatusSpec,
    never_applied: bool,
    compare_full_schematic_id: bool,
    schematic_mismatch: bool,
    talos_version_mismatch: bool,
    should_upgrade: bool,
    config_updates_allowed: bool,
}

/// Builds the reconciliation context (spec §4.1.1 steps 1-10). Returns
/// `Err(Skip)` for any missing prerequisite resource or unmet
/// precondition, per the spec's "skip with a tagged error" language.
async fn build_context(machine_id: &str, ctx: &ConfigStatusContext) -> Result<ReconciliationContext> {
    let (desired_meta, desired) = ctx.cluster_machine_config.get(machine_id)?;
    let desired_config_version = desired_meta.version;
    let last_config_error = desired.generation_error.clone().unwrap_or_default();

    let (machine_set_node_meta, _) = ctx
        .machine_set_node
        .try_get(machine_id)?
        .ok_or_else(|| ReconcileError::skip("machine-set node not yet registered"))?;

    let (_, existing_status) = ctx.cluster_machine_config_status.try_get(machine_id)?.unwrap_or_default_pair();
    let never_applied = existing_status.cluster_machine_config_sha256.is_empty();

    let mut locked = machine_set_node_meta.annotation(MACHINE_LOCKED).is_some() && !never_applied;

    let redacted_machine_config = redact_machine_config(&desired.config_bytes);

    if !locked {
        if let Ok((cluster_id, _)) = cluster_of(machine_id, ctx) {
            if let Ok((cluster_meta, _)) = ctx.cluster.get(&cluster_id) {
                locked = cluster_meta.annotation(CLUSTER_LOCKED).is_some() && cluster_meta.phase == Phase::Running;
            }
        }
    }

    let (_, cluster_machine) = ctx.cluster_machine.try_get(machine_id)?.ok_or_else(|| ReconcileError::skip("cluster machine not found"))?;
    let (_, machine_status) = ctx.machine_status.try_get(machine_id)?.ok_or_else(|| ReconcileError::skip("machine status not found"))?;
    let (_, snapshot) = ctx
        .machine_status_snapshot
        .try_get(machine_id)?
        .ok_or_else(|| ReconcileError::skip("machine status snapshot not found"))?;
    let (_, gen_options) = ctx
        .machine_config_gen_options
        .try_get(machine_id)?
        .ok_or_else(|| ReconcileError::skip("machine config gen options not found"))?;
    let (_, machine_set) = ctx
        .machine_set
        .try_get(&cluster_machine.machine_set)?
        .ok_or_else(|| ReconcileError::skip("machine set not found"))?;
    let (_, machine_set_status) = ctx
        .machine_set_status
        .try_get(&cluster_machine.machine_set)?
        .ok_or_else(|| ReconcileError::skip("machine set status not found"))?;

    if !machine_status.connected {
        return Err(ReconcileError::skip("machine not connected"));
    }
    if let Some(ready) = machine_status.infra_ready_to_use {
        if !ready {
            return Err(ReconcileError::skip("infra machine status not ready to use"));
        }
    }

    let compare_full_schematic_id = machine_status.security_state.booted_with_uki || at_least(&machine_status.talos_version, 1, 12);

    let reported_schematic = if compare_full_schematic_id {
        &machine_status.schematic.full_id
    } else {
        &machine_status.schematic.id
    };
    let desired_schematic = &gen_options.install_image.schematic_id;
    let last_applied_schematic = &existing_status.schematic_id;

    let schematic_mismatch = !machine_status.schematic.invalid
        && reported_schematic != desired_schematic
        && last_applied_schematic != desired_schematic;

    let talos_version_mismatch = machine_status.talos_version != gen_options.install_image.talos_version
        && existing_status.talos_version != gen_options.install_image.talos_version;

    let should_upgrade = schematic_mismatch || talos_version_mismatch;
    let config_updates_allowed = machine_set_status.config_updates_allowed;

    Ok(ReconciliationContext {
        machine_id: machine_id.to_string(),
        desired_bytes: desired.config_bytes,
        desired_config_version,
        last_config_error,
        locked,
        redacted_machine_config,
        machine_set,
        machine_set_status,
        cluster_machine,
        machine_status,
        snapshot_stage: snapshot.stage,
        install_image: gen_options.install_image,
        existing_status,
        never_applied,
        compare_full_schematic_id,
        schematic_mismatch,
        talos_version_mismatch,
        should_upgrade,
        config_updates_allowed,
    })
}

/// `ClusterMachine` ids double as cluster ids aren't directly derivable;
/// this core models the cluster a machine belongs to via its
/// `well_known::CLUSTER_NAME` label on the `ClusterMachine` resource.
fn cluster_of(machine_id: &str, ctx: &ConfigStatusContext) -> Result<(String, ())> {
    let (meta, _) = ctx.cluster_machine.get(machine_id)?;
    meta.label(omni_resources::well_known::CLUSTER_NAME)
        .map(|s| (s.to_string(), ()))
        .ok_or_else(|| ReconcileError::skip("cluster machine missing cluster-name label"))
}

trait TryGetPairExt<T> {
    fn unwrap_or_default_pair(self) -> (Metadata, T);
}

impl<T: Default> TryGetPairExt<T> for Option<(Metadata, T)> {
    fn unwrap_or_default_pair(self) -> (Metadata, T) {
        self.unwrap_or_else(|| (Metadata::new("default", "ClusterMachineConfigStatus", "unset"), T::default()))
    }
}

/// Running-state transform (spec §4.1.2).
async fn apply(metadata: Metadata, spec: ClusterMachineConfigSpec, ctx: Arc<ConfigStatusContext>) -> Result<Action> {
    let machine_id = metadata.id.clone();
    let rc = build_context(&machine_id, &ctx).await?;

    update_pending_updates(&rc, &ctx)?;

    if rc.locked {
        info!(machine = %machine_id, "cluster machine locked, skipping mutation");
        return Ok(Action::await_change());
    }

    if !rc.last_config_error.is_empty() {
        write_last_config_error(&ctx, &rc, &rc.last_config_error)?;
        return Ok(Action::await_change());
    }

    if rc.should_upgrade {
        let outcome = upgrade(&rc, &ctx).await?;
        if !outcome.in_sync {
            return Err(ReconcileError::requeue_after(Duration::from_secs(5), "node version still drifting"));
        }
    }

    if matches!(rc.snapshot_stage, MachineStage::Booting | MachineStage::Running) {
        if let Ok(shared) = normal_client(&machine_id, &ctx).await {
            let mut client = shared.lock().await;
            if let Err(e) = client.meta_delete(upgrade_key_meta_key()).await {
                if !(e.is_not_found() || e.is_benign_on_upgrade()) {
                    warn!(machine = %machine_id, error = %e, "best-effort upgrade-key meta-delete failed");
                }
            }
        }
    }

    let sha = hex::encode(Sha256::digest(&rc.desired_bytes));
    if sha != rc.existing_status.cluster_machine_config_sha256 {
        match apply_config(&rc, &ctx).await {
            Ok(ApplyOutcome { mode }) => {
                if mode != omni_talos_client::pb::ApplyMode::NoRebootMode {
                    return Ok(Action::await_change());
                }
            }
            Err(ApplyError::InvalidArgument(message)) => {
                write_last_config_error(&ctx, &rc, &message)?;
                return Ok(Action::await_change());
            }
            Err(ApplyError::Other(e)) => return Err(e),
        }
    }

    write_synced_status(&ctx, &rc, &sha)?;
    ctx.pending_updates.destroy(&machine_id, pending_updates_version(&ctx, &machine_id)?).ok();
    ctx.lock.release(&ctx.cluster_machine, &machine_id)?;

    Ok(Action::await_change())
}

fn pending_updates_version(ctx: &ConfigStatusContext, machine_id: &str) -> Result<u64> {
    Ok(ctx.pending_updates.try_get(machine_id)?.map(|(m, _)| m.version).unwrap_or(0))
}

fn write_last_config_error(ctx: &ConfigStatusContext, rc: &ReconciliationContext, message: &str) -> Result<()> {
    let mut status = rc.existing_status.clone();
    status.last_config_error = message.to_string();
    upsert_status(ctx, &rc.machine_id, status)
}

fn write_synced_status(ctx: &ConfigStatusContext, rc: &ReconciliationContext, sha: &str) -> Result<()> {
    let status = ClusterMachineConfigStatusSpec {
        cluster_machine_config_sha256: sha.to_string(),
        cluster_machine_config_version: rc.desired_config_version.to_string(),
        talos_version: rc.install_image.talos_version.clone(),
        schematic_id: rc.install_image.schematic_id.clone(),
        last_config_error: String::new(),
        redacted_machine_config: rc.redacted_machine_config.clone(),
    };
    upsert_status(ctx, &rc.machine_id, status)
}

fn upsert_status(ctx: &ConfigStatusContext, machine_id: &str, status: ClusterMachineConfigStatusSpec) -> Result<()> {
    match ctx.cluster_machine_config_status.try_get(machine_id)? {
        Some((meta, _)) => {
            let version = meta.version;
            ctx.cluster_machine_config_status.update(machine_id, version, status, |m| {
                if let Ok((cm_meta, _)) = ctx.cluster_machine.get(machine_id) {
                    m.labels = cluster_identifying_labels(&cm_meta.labels);
                }
            })?;
        }
        None => {
            let mut meta = Metadata::new("default", "ClusterMachineConfigStatus", machine_id);
            if let Ok((cm_meta, _)) = ctx.cluster_machine.get(machine_id) {
                meta.labels = cluster_identifying_labels(&cm_meta.labels);
            }
            ctx.cluster_machine_config_status.create(meta, status)?;
        }
    }
    Ok(())
}

/// Spec §4.1.6: pending-updates surface.
fn update_pending_updates(rc: &ReconciliationContext, ctx: &ConfigStatusContext) -> Result<()> {
    let previous_redacted = &rc.existing_status.redacted_machine_config;
    let diff = config_diff(previous_redacted, &rc.redacted_machine_config);

    if diff.is_empty() && !rc.should_upgrade {
        if let Some((meta, _)) = ctx.pending_updates.try_get(&rc.machine_id)? {
            ctx.pending_updates.destroy(&rc.machine_id, meta.version)?;
        }
        return Ok(());
    }

    let upgrade = rc.should_upgrade.then(|| PendingUpgrade {
        from_schematic: rc.existing_status.schematic_id.clone(),
        to_schematic: rc.install_image.schematic_id.clone(),
        from_version: rc.existing_status.talos_version.clone(),
        to_version: rc.install_image.talos_version.clone(),
    });
    let spec = MachinePendingUpdatesSpec { config_diff: diff, upgrade };

    let cluster_labels = ctx.cluster_machine.get(&rc.machine_id).map(|(m, _)| cluster_identifying_labels(&m.labels)).unwrap_or_default();

    match ctx.pending_updates.try_get(&rc.machine_id)? {
        Some((meta, _)) => {
            let version = meta.version;
            ctx.pending_updates.update(&rc.machine_id, version, spec, |m| {
                m.labels = cluster_labels;
            })?;
        }
        None => {
            let mut meta = Metadata::new("default", "MachinePendingUpdates", &rc.machine_id);
            meta.labels = cluster_labels;
            ctx.pending_updates.create(meta, spec)?;
        }
    }
    Ok(())
}

struct UpgradeOutcome {
    in_sync: bool,
}

/// Upgrade protocol (spec §4.1.3).
async fn upgrade(rc: &ReconciliationContext, ctx: &ConfigStatusContext) -> Result<UpgradeOutcome> {
    let maintenance = rc.snapshot_stage == MachineStage::Maintenance;
    if !matches!(rc.snapshot_stage, MachineStage::Maintenance | MachineStage::Booting | MachineStage::Running) {
        return Ok(UpgradeOutcome { in_sync: !rc.existing_status.talos_version.is_empty() });
    }

    let mut client = connect_for(rc, ctx, maintenance).await?;
    let actual_version = client.version().await.map_err(client_error)?;
    let schematic_info = client.schematic_info().await.map_err(client_error)?;

    let expected_schematic = if schematic_info.invalid { String::new() } else { rc.install_image.schematic_id.clone() };
    let schematic_equal = expected_schematic.is_empty() || schematic_info.id == expected_schematic || schematic_info.full_id == expected_schematic;

    if actual_version == rc.install_image.talos_version && schematic_equal {
        let mut status = rc.existing_status.clone();
        status.talos_version = actual_version;
        status.schematic_id = rc.install_image.schematic_id.clone();
        upsert_status(ctx, &rc.machine_id, status)?;
        return Ok(UpgradeOutcome { in_sync: true });
    }

    let params = InstallImageParams {
        schematic_id: if schematic_info.invalid { None } else { Some(rc.install_image.schematic_id.clone()) },
        talos_version: rc.install_image.talos_version.clone(),
        platform: rc.install_image.platform.clone(),
        secure_boot: rc.install_image.security_state.secure_boot,
    };
    let image = ctx.image_factory.install_image_url(&params);
    let stage = should_stage_upgrade(&rc.install_image.talos_version);

    match client.upgrade(image, !maintenance, stage, false).await {
        Ok(()) => Ok(UpgradeOutcome { in_sync: false }),
        Err(e) if e.is_benign_on_upgrade() => Ok(UpgradeOutcome { in_sync: true }),
        Err(e) => Err(client_error(e)),
    }
}

struct ApplyOutcome {
    mode: omni_talos_client::pb::ApplyMode,
}

enum ApplyError {
    InvalidArgument(String),
    Other(ReconcileError),
}

/// Apply protocol (spec §4.1.4).
async fn apply_config(rc: &ReconciliationContext, ctx: &ConfigStatusContext) -> std::result::Result<ApplyOutcome, ApplyError> {
    let maintenance = match rc.snapshot_stage {
        MachineStage::Booting | MachineStage::Running => false,
        MachineStage::Maintenance => {
            if !rc.never_applied {
                return Err(ApplyError::Other(ReconcileError::skip("maintenance apply requires a never-applied machine")));
            }
            true
        }
        _ => return Err(ApplyError::Other(ReconcileError::skip("machine stage does not allow apply"))),
    };

    let mut client = connect_for(rc, ctx, maintenance).await.map_err(ApplyError::Other)?;
    client.version().await.map_err(|e| ApplyError::Other(client_error(e)))?;

    let outcome = ctx
        .lock
        .acquire(
            &ctx.cluster_machine,
            &rc.machine_id,
            &rc.cluster_machine.machine_set,
            rc.machine_set.max_parallelism,
            rc.never_applied,
            rc.config_updates_allowed,
        )
        .await
        .map_err(ApplyError::Other)?;

    if !outcome.holds_slot() {
        let reason = match outcome {
            AcquireOutcome::ConfigUpdatesBlocked => "machine set blocks config changes",
            AcquireOutcome::QuotaReached => "quota reached, waiting",
            _ => "config update slot unavailable",
        };
        return Err(ApplyError::Other(ReconcileError::skip(reason)));
    }

    match client.apply_configuration(rc.desired_bytes.clone(), omni_talos_client::pb::ApplyMode::Auto).await {
        Ok(mode) => Ok(ApplyOutcome { mode }),
        Err(omni_talos_client::ClientError::Rpc(status)) if status.code() == tonic::Code::InvalidArgument => {
            Err(ApplyError::InvalidArgument(status.message().to_string()))
        }
        Err(e) => Err(ApplyError::Other(client_error(e))),
    }
}

async fn connect_for(rc: &ReconciliationContext, ctx: &ConfigStatusContext, maintenance: bool) -> Result<NodeClient> {
    if maintenance {
        ctx.clients.maintenance(&rc.machine_status.management_address).await.map_err(client_error)
    } else {
        let shared = normal_client(&rc.machine_id, ctx).await?;
        Ok(shared.lock().await.clone())
    }
}

/// Builds (or reuses, via the cache) the cluster's shared normal-mode
/// node client for `machine_id`'s cluster.
async fn normal_client(machine_id: &str, ctx: &ConfigStatusContext) -> Result<crate::clients::SharedNodeClient> {
    let (cluster_id, _) = cluster_of(machine_id, ctx)?;
    let (_, talos_config_spec) = ctx.talos_config.get(&cluster_id).map_err(ReconcileError::Store)?;
    let talos_config = omni_talos_client::TalosConfig {
        ca_pem: talos_config_spec.ca_pem.into_bytes(),
        crt_pem: talos_config_spec.client_cert_pem.into_bytes(),
        key_pem: talos_config_spec.client_key_pem.into_bytes(),
        endpoints: ctx
            .cluster_endpoint
            .try_get(&cluster_id)?
            .map(|(_, s)| s.management_addresses)
            .unwrap_or_default(),
    };
    ctx.clients.normal(&cluster_id, &talos_config).await.map_err(client_error)
}

fn client_error(e: omni_talos_client::ClientError) -> ReconcileError {
    ReconcileError::Fatal(anyhow::anyhow!(e))
}

/// The meta key historically used to signal an in-flight maintenance
/// upgrade; cleared best-effort once the node reaches `BOOTING`/`RUNNING`
/// (spec §4.1.2 step 5). Reuses `USER_RESERVED_2` (13), the slot the
/// upgrade-status controller also writes to.
fn upgrade_key_meta_key() -> u32 {
    crate::meta_keys::USER_RESERVED_2
}

/// Reset protocol (spec §4.1.7), run when the `ClusterMachineConfig`
/// enters `tearing-down`.
async fn cleanup(metadata: Metadata, spec: ClusterMachineConfigSpec, ctx: Arc<ConfigStatusContext>) -> Result<Action> {
    let machine_id = metadata.id.clone();
    let _ = &spec;

    if let Some((meta, _)) = ctx.pending_updates.try_get(&machine_id)? {
        ctx.pending_updates.destroy(&machine_id, meta.version)?;
    }
    ctx.lock.release(&ctx.cluster_machine, &machine_id)?;

    let Some((cm_meta, cluster_machine)) = ctx.cluster_machine.try_get(&machine_id)? else {
        return Ok(Action::await_change());
    };
    if cm_meta.phase == Phase::TearingDown {
        return Ok(Action::await_change());
    }

    if let Ok((cluster_id, _)) = cluster_of(&machine_id, &ctx) {
        if let Ok((cluster_meta, _)) = ctx.cluster.get(&cluster_id) {
            let tainted = cluster_meta.label(omni_resources::well_known::TAINTED_BY_IMPORTING).is_some()
                || cluster_meta.label(omni_resources::well_known::TAINTED_BY_EXPORTING).is_some();
            if cluster_meta.annotation(CLUSTER_LOCKED).is_some() && tainted && cluster_meta.phase == Phase::TearingDown {
                return Err(ReconcileError::skip("reset suppressed during cluster rename/import"));
            }
        }
    }

    let Some((_, machine_status)) = ctx.machine_status.try_get(&machine_id)? else {
        return Err(ReconcileError::skip("machine status gone"));
    };
    if !machine_status.connected {
        return Err(ReconcileError::skip("machine not connected, waiting to reconnect"));
    }

    let Some((_, snapshot)) = ctx.machine_status_snapshot.try_get(&machine_id)? else {
        return Err(ReconcileError::skip("machine status snapshot not found"));
    };

    if snapshot.stage == MachineStage::Resetting {
        return Err(ReconcileError::requeue_after(defaults::RESET_REQUEUE, "reset already in progress"));
    }

    if snapshot.stage == MachineStage::Maintenance {
        let mut client = ctx.clients.maintenance(&machine_status.management_address).await.map_err(client_error)?;
        if client.version().await.is_ok() {
            on_final_teardown(&ctx, &machine_id)?;
            return Ok(Action::await_change());
        }
        let attempt = ctx.bookkeeping.record_maintenance_probe_attempt(&machine_id);
        if attempt >= ctx.config.reset.maintenance_check_attempts {
            return Ok(Action::await_change());
        }
        return Err(ReconcileError::requeue_after(Duration::from_secs(u64::from(attempt)), "waiting for maintenance mode to come up"));
    }

    let force_destroy = ctx.node_force_destroy_request.try_get(&machine_id)?.is_some();
    let machine_set_destroying = ctx
        .machine_set_status
        .try_get(&cluster_machine.machine_set)?
        .map(|(_, s)| s.phase == MachineSetPhase::Destroying)
        .unwrap_or(false);
    let graceful = !force_destroy && !machine_set_destroying && ctx.bookkeeping.is_graceful(&machine_id);
    ctx.bookkeeping.set_graceful(&machine_id, graceful);
    let is_control_plane = cm_meta.label(IS_CONTROL_PLANE).is_some();

    let allowed = match snapshot.stage {
        MachineStage::Running => true,
        MachineStage::Booting => !graceful || !is_control_plane,
        _ => false,
    };
    if !allowed {
        return Err(ReconcileError::skip("machine stage does not allow reset"));
    }

    let shared = normal_client(&machine_id, &ctx).await?;
    {
        let mut client = shared.lock().await;
        if let Err(e) = client.meta_delete(STATE_ENCRYPTION_CONFIG).await {
            if !(e.is_not_found() || e.is_benign_on_upgrade()) {
                warn!(machine = %machine_id, error = %e, "best-effort state-encryption meta-delete failed");
            }
        }

        if graceful && is_control_plane && ctx.bookkeeping.etcd_leave_attempts(&machine_id) < ctx.config.reset.etcd_leave_attempts_limit {
            ctx.bookkeeping.record_etcd_leave_attempt(&machine_id);
            if let Err(e) = client.etcd_forfeit_leadership().await {
                return Err(ReconcileError::requeue_after(defaults::ETCD_LEAVE_REQUEUE, format!("etcd forfeit leadership failed: {e}")));
            }
            if let Err(e) = client.etcd_leave_cluster().await {
                return Err(ReconcileError::requeue_after(defaults::ETCD_LEAVE_REQUEUE, format!("etcd leave cluster failed: {e}")));
            }
        }

        client
            .reset(graceful, true, vec![("EPHEMERAL".to_string(), true), ("STATE".to_string(), true)])
            .await
            .map_err(client_error)?;
    }

    ctx.bookkeeping.mark_ongoing(&machine_id);
    Err(ReconcileError::skip("reset issued, waiting for node to reach maintenance"))
}

fn on_final_teardown(ctx: &ConfigStatusContext, machine_id: &str) -> Result<()> {
    if let Some((meta, _)) = ctx.node_force_destroy_request.try_get(machine_id)? {
        ctx.node_force_destroy_request.destroy(machine_id, meta.version)?;
    }
    ctx.bookkeeping.purge(machine_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_applied_when_sha_empty() {
        let status = ClusterMachineConfigStatusSpec::default();
        assert!(status.cluster_machine_config_sha256.is_empty());
    }

    #[test]
    fn sha256_matches_digest_of_desired_bytes() {
        let bytes = b"hostname: node-1\n".to_vec();
        let expected = hex::encode(Sha256::digest(&bytes));
        assert_eq!(expected.len(), 64);
        assert_eq!(hex::encode(Sha256::digest(&bytes)), expected);
    }

    #[test]
    fn compare_full_schematic_id_true_for_uki_or_new_talos() {
        assert!(at_least("1.12.0", 1, 12));
        assert!(!at_least("1.11.9", 1, 12));
    }

    #[test]
    fn should_stage_upgrade_only_for_known_bug_range() {
        assert!(should_stage_upgrade("1.9.1"));
        assert!(!should_stage_upgrade("1.10.0"));
    }
}

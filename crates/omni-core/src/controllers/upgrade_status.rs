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

//! Upgrade-status controller (spec §4.2): the maintenance-mode upgrade
//! driver. Watches `MachineStatus`, recomputes the schematic a machine
//! should be running once its `KernelArgs` are folded in, and drives a
//! maintenance-mode `Upgrade` when it drifts and the machine is in a
//! state where that is safe.

use std::sync::Arc;

use chrono::Utc;
use omni_resources::{
    Kind, KernelArgsSpec, MachineConfigGenOptionsSpec, MachineStatusSpec, MachineUpgradeStatusPhase,
    MachineUpgradeStatusSpec, Metadata, TypedStore,
};
use omni_runtime::{Action, ReconcileError, Result};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::clients::TalosClients;
use crate::config::{defaults, ControllerConfig};
use crate::version::at_least;
use omni_talos_client::{ImageFactoryClient, InstallImageParams};

pub struct UpgradeStatusContext {
    pub machine_config_gen_options: TypedStore<MachineConfigGenOptionsSpec>,
    pub kernel_args: TypedStore<KernelArgsSpec>,
    pub machine_upgrade_status: TypedStore<MachineUpgradeStatusSpec>,
    pub clients: Arc<TalosClients>,
    pub image_factory: ImageFactoryClient,
    pub config: ControllerConfig,
}

#[instrument(skip(spec, ctx), fields(machine = %metadata.id))]
pub async fn reconcile(metadata: Metadata, spec: MachineStatusSpec, ctx: Arc<UpgradeStatusContext>) -> Result<Action> {
    let machine_id = metadata.id.clone();

    // A machine that has never reported a schematic at all (nil/raw
    // empty) has nothing to compare against yet.
    if spec.schematic.id.is_empty() && spec.schematic.full_id.is_empty() {
        return Err(ReconcileError::skip("machine has not reported a schematic yet"));
    }

    let (_, gen_options) = ctx
        .machine_config_gen_options
        .try_get(&machine_id)?
        .ok_or_else(|| ReconcileError::skip("machine config gen options not found"))?;
    let kernel_args = ctx.kernel_args.try_get(&machine_id)?.map(|(_, s)| s.args).unwrap_or_default();

    let existing = ctx.machine_upgrade_status.try_get(&machine_id)?;

    // Cooldown: once upgrading, leave the node alone for a while before
    // re-evaluating (spec §4.2: "do not re-invoke for 2 minutes").
    if let Some((_, status)) = &existing {
        if status.phase == MachineUpgradeStatusPhase::Upgrading {
            if let Some(since) = status.upgrading_since {
                let elapsed = Utc::now().signed_duration_since(since);
                let cooldown = chrono::Duration::from_std(defaults::UPGRADE_STATUS_COOLDOWN).unwrap_or_default();
                if elapsed < cooldown {
                    return Ok(Action::requeue(defaults::UPGRADE_STATUS_REQUEUE));
                }
            }
        }
    }

    let compare_full = spec.security_state.booted_with_uki || at_least(&spec.talos_version, 1, 12);
    let reported: &str = if compare_full { &spec.schematic.full_id } else { &spec.schematic.id };
    let base_schematic = gen_options.install_image.schematic_id.as_str();

    let recomputed = recompute_schematic_id(base_schematic, &kernel_args);

    // Spec §4.2: a reported id that matches neither the recomputed one
    // nor the known base schematic indicates drift the controller
    // doesn't understand (e.g. a stale image-factory library) — park it
    // rather than risk upgrading to the wrong thing.
    if !spec.schematic.invalid && reported != recomputed && reported != base_schematic {
        write_status(
            &ctx,
            &machine_id,
            MachineUpgradeStatusSpec {
                phase: MachineUpgradeStatusPhase::Unknown,
                error: "schematic ID mismatch".to_string(),
                upgrading_since: None,
            },
        )?;
        return Ok(Action::await_change());
    }

    let desired = if kernel_args.is_empty() { base_schematic.to_string() } else { recomputed };

    if reported == desired {
        write_status(
            &ctx,
            &machine_id,
            MachineUpgradeStatusSpec {
                phase: MachineUpgradeStatusPhase::UpToDate,
                error: String::new(),
                upgrading_since: None,
            },
        )?;
        return Ok(Action::await_change());
    }

    let only_kernel_args_changed = !kernel_args.is_empty() && reported == base_schematic;
    let kernel_args_update_supported = !only_kernel_args_changed || compare_full;

    let precondition_error = if !spec.maintenance {
        Some("waiting for maintenance mode")
    } else if !spec.system_disk_present {
        Some("waiting for system disk")
    } else if spec.platform_metadata.platform.is_empty() {
        Some("waiting for known platform")
    } else if !kernel_args_update_supported {
        Some("kernel-args-only update requires UKI boot or Talos >= 1.12")
    } else {
        None
    };

    if let Some(reason) = precondition_error {
        write_status(
            &ctx,
            &machine_id,
            MachineUpgradeStatusSpec {
                phase: MachineUpgradeStatusPhase::Pending,
                error: reason.to_string(),
                upgrading_since: None,
            },
        )?;
        return Ok(Action::await_change());
    }

    trigger_upgrade(&ctx, &machine_id, &spec, &gen_options.install_image, &desired).await?;
    Ok(Action::requeue(defaults::UPGRADE_STATUS_REQUEUE))
}

/// Folds `ExtraKernelArgs` into a base schematic id the same way the
/// image factory would (spec §4.2: "desiredSchematic = reportedSchematic
/// with ExtraKernelArgs <- KernelArgs"), hashed rather than
/// string-templated so the comparison doesn't depend on argument
/// ordering.
fn recompute_schematic_id(base_schematic_id: &str, kernel_args: &[String]) -> String {
    let mut sorted: Vec<&str> = kernel_args.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(base_schematic_id.as_bytes());
    for arg in sorted {
        hasher.update(b"\0");
        hasher.update(arg.as_bytes());
    }
    hex::encode(hasher.finalize())
}

async fn trigger_upgrade(
    ctx: &UpgradeStatusContext,
    machine_id: &str,
    spec: &MachineStatusSpec,
    install_image: &omni_resources::InstallImage,
    desired_schematic: &str,
) -> Result<()> {
    let mut client = ctx
        .clients
        .maintenance(&spec.management_address)
        .await
        .map_err(|e| ReconcileError::Fatal(anyhow::anyhow!(e)))?;

    let schematic_yaml = format!("customization:\n  extraKernelArgs: []\n# base: {desired_schematic}\n");
    let ensured = ctx
        .image_factory
        .ensure_schematic(&schematic_yaml)
        .await
        .map_err(|e| ReconcileError::Fatal(anyhow::anyhow!(e)))?;

    let image = ctx.image_factory.install_image_url(&InstallImageParams {
        schematic_id: Some(ensured.full_id),
        talos_version: install_image.talos_version.clone(),
        platform: spec.platform_metadata.platform.clone(),
        secure_boot: spec.security_state.secure_boot,
    });

    client
        .upgrade(image, false, false, false)
        .await
        .map_err(|e| ReconcileError::Fatal(anyhow::anyhow!(e)))?;

    info!(machine = %machine_id, "maintenance-mode upgrade triggered");

    write_status(
        ctx,
        machine_id,
        MachineUpgradeStatusSpec {
            phase: MachineUpgradeStatusPhase::Upgrading,
            error: String::new(),
            upgrading_since: Some(Utc::now()),
        },
    )
}

fn write_status(ctx: &UpgradeStatusContext, machine_id: &str, status: MachineUpgradeStatusSpec) -> Result<()> {
    match ctx.machine_upgrade_status.try_get(machine_id)? {
        Some((meta, _)) => {
            ctx.machine_upgrade_status.update(machine_id, meta.version, status, |_| {})?;
        }
        None => {
            let meta = Metadata::new("default", MachineUpgradeStatusSpec::KIND, machine_id);
            ctx.machine_upgrade_status.create(meta, status)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recompute_is_stable_under_kernel_arg_reordering() {
        let a = recompute_schematic_id("base", &["b=1".to_string(), "a=2".to_string()]);
        let b = recompute_schematic_id("base", &["a=2".to_string(), "b=1".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn recompute_differs_when_base_schematic_changes() {
        let a = recompute_schematic_id("base-1", &["a=2".to_string()]);
        let b = recompute_schematic_id("base-2", &["a=2".to_string()]);
        assert_ne!(a, b);
    }
}

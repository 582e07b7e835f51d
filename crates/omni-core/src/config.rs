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

//! Controller configuration (spec §9 open question 2): the spec's fixed
//! constants (`maintenanceCheckAttempts=5`, `etcdLeaveAttemptsLimit=2`,
//! cache sizing, timeouts) are exposed as configurable fields defaulting
//! to those values, mirroring the teacher's
//! `ControllerConfig::from_mounted_file` + `.validate()` pattern.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named timeout/interval constants from spec §5 and §9, expressed as
/// `Duration`s so call sites never hard-code a number.
pub mod defaults {
    use std::time::Duration;

    pub const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const APPLY_TIMEOUT: Duration = Duration::from_secs(60);
    pub const UPGRADE_TIMEOUT: Duration = Duration::from_secs(300);
    pub const RESET_PRECHECK_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CLIENT_CONSTRUCTION_TIMEOUT: Duration = Duration::from_secs(5);

    pub const RESET_REQUEUE: Duration = Duration::from_secs(60);
    pub const ETCD_LEAVE_REQUEUE: Duration = Duration::from_secs(1);

    pub const CLIENT_CACHE_CAPACITY: usize = 256;
    pub const CLIENT_CACHE_TTL: Duration = Duration::from_secs(3600);

    pub const CONFIG_STATUS_WORKERS: usize = 8;

    pub const MAINTENANCE_CHECK_ATTEMPTS: u32 = 5;
    pub const ETCD_LEAVE_ATTEMPTS_LIMIT: u32 = 2;

    pub const UPGRADE_STATUS_COOLDOWN: Duration = Duration::from_secs(120);
    pub const UPGRADE_STATUS_REQUEUE: Duration = Duration::from_secs(60);

    pub const CERT_REFRESH_TICK_INTERVAL: Duration = Duration::from_secs(3600);
    pub const CLUSTER_METRICS_MIN_INTERVAL: Duration = Duration::from_secs(10);

    pub const VIRTUAL_RESOURCE_IDLE_INTERVAL: Duration = Duration::from_secs(300);
    pub const VIRTUAL_RESOURCE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
}

fn default_workers() -> usize {
    defaults::CONFIG_STATUS_WORKERS
}

fn default_maintenance_attempts() -> u32 {
    defaults::MAINTENANCE_CHECK_ATTEMPTS
}

fn default_etcd_leave_attempts() -> u32 {
    defaults::ETCD_LEAVE_ATTEMPTS_LIMIT
}

fn default_cache_capacity() -> usize {
    defaults::CLIENT_CACHE_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    defaults::CLIENT_CACHE_TTL.as_secs()
}

fn default_cert_refresh_interval_secs() -> u64 {
    defaults::CERT_REFRESH_TICK_INTERVAL.as_secs()
}

fn default_image_factory_host() -> String {
    "https://factory.talos.dev".to_string()
}

/// Main controller configuration, loaded from a mounted YAML file
/// (mirrors the teacher's `ControllerConfig::from_mounted_file`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub image_factory: ImageFactoryConfig,

    #[serde(default)]
    pub client_cache: ClientCacheConfig,

    #[serde(default)]
    pub parallelism: ParallelismConfig,

    #[serde(default)]
    pub reset: ResetConfig,

    #[serde(default = "default_cert_refresh_interval_secs")]
    pub cert_refresh_tick_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            image_factory: ImageFactoryConfig::default(),
            client_cache: ClientCacheConfig::default(),
            parallelism: ParallelismConfig::default(),
            reset: ResetConfig::default(),
            cert_refresh_tick_interval_secs: default_cert_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageFactoryConfig {
    #[serde(default = "default_image_factory_host")]
    pub host: String,
}

impl Default for ImageFactoryConfig {
    fn default() -> Self {
        Self {
            host: default_image_factory_host(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientCacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl ClientCacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelismConfig {
    #[serde(default = "default_workers")]
    pub config_status_workers: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            config_status_workers: default_workers(),
        }
    }
}

/// Spec §9 open question 2: the maintenance-probe and etcd-leave
/// ceilings, fixed in the spec but kept configurable here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResetConfig {
    #[serde(default = "default_maintenance_attempts")]
    pub maintenance_check_attempts: u32,
    #[serde(default = "default_etcd_leave_attempts")]
    pub etcd_leave_attempts_limit: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            maintenance_check_attempts: default_maintenance_attempts(),
            etcd_leave_attempts_limit: default_etcd_leave_attempts(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a mounted YAML file, applying defaults for
    /// anything unset, then validate it.
    pub fn from_mounted_file(config_path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {config_path}: {e}"))?;
        let config: ControllerConfig =
            serde_yaml::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse config YAML: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that configuration has sane, non-zero values.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.image_factory.host.trim().is_empty() {
            return Err(anyhow::anyhow!("image_factory.host must not be empty"));
        }
        if self.client_cache.capacity == 0 {
            return Err(anyhow::anyhow!("client_cache.capacity must be non-zero"));
        }
        if self.parallelism.config_status_workers == 0 {
            return Err(anyhow::anyhow!("parallelism.config_status_workers must be non-zero"));
        }
        if self.reset.etcd_leave_attempts_limit == 0 {
            return Err(anyhow::anyhow!("reset.etcd_leave_attempts_limit must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ControllerConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_image_factory_host() {
        let mut config = ControllerConfig::default();
        config.image_factory.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let config: ControllerConfig = serde_yaml::from_str("image_factory:\n  host: https://factory.example.com\n").unwrap();
        assert_eq!(config.image_factory.host, "https://factory.example.com");
        assert_eq!(config.reset.maintenance_check_attempts, defaults::MAINTENANCE_CHECK_ATTEMPTS);
    }
}

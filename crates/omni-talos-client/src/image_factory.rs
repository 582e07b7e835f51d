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

//! HTTP client for the image factory's public surface (spec §6):
//! `EnsureSchematic` and the install-image URL builder.

use serde::Deserialize;

use crate::error::Result;

/// Parameters needed to build an install-image reference (spec §4.1.1
/// step 10, §4.2, §6).
#[derive(Debug, Clone)]
pub struct InstallImageParams {
    /// `None` when the machine's reported schematic was flagged invalid
    /// by `SchematicInfo` — omit the schematic segment and fall back to
    /// the plain Talos registry image.
    pub schematic_id: Option<String>,
    pub talos_version: String,
    pub platform: String,
    pub secure_boot: bool,
}

#[derive(Debug, Deserialize)]
struct EnsureSchematicResponse {
    id: String,
}

/// A minted schematic identifier returned by the image factory.
#[derive(Debug, Clone)]
pub struct EnsuredSchematic {
    pub full_id: String,
}

#[derive(Clone)]
pub struct ImageFactoryClient {
    http: reqwest::Client,
    host: String,
}

impl ImageFactoryClient {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
        }
    }

    /// Submits a schematic document and returns the factory-assigned id
    /// (spec §6 `EnsureSchematic`).
    pub async fn ensure_schematic(&self, schematic_yaml: &str) -> Result<EnsuredSchematic> {
        let resp: EnsureSchematicResponse = self
            .http
            .post(format!("{}/schematics", self.host))
            .body(schematic_yaml.to_owned())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EnsuredSchematic { full_id: resp.id })
    }

    /// Builds `{host}/{installer}/{schematicId}:v{version}` per spec §6's
    /// installer-naming and platform-prefix rules, falling back to the
    /// plain Talos registry image when the schematic is invalid.
    #[must_use]
    pub fn install_image_url(&self, params: &InstallImageParams) -> String {
        let installer = self.installer_name(params);
        match &params.schematic_id {
            Some(schematic_id) => format!(
                "{}/{}/{}:v{}",
                self.host, installer, schematic_id, params.talos_version
            ),
            None => format!("{}/{}:v{}", self.host, installer, params.talos_version),
        }
    }

    fn installer_name(&self, params: &InstallImageParams) -> String {
        let base = if params.secure_boot {
            "installer-secureboot"
        } else {
            "installer"
        };
        if talos_version_at_least(&params.talos_version, 1, 10) {
            format!("{}-{base}", params.platform)
        } else {
            base.to_string()
        }
    }
}

/// Compares the leading `major.minor` components of a Talos version
/// string (`"v1.10.2"` / `"1.10.2"`) against `(major, minor)`. Unparsable
/// input is treated as below the threshold, so unknown/old reports never
/// trigger the new-style install-image naming.
fn talos_version_at_least(version: &str, major: u32, minor: u32) -> bool {
    let trimmed = version.trim_start_matches('v');
    let mut parts = trimmed.split('.');
    let (Some(maj), Some(min)) = (parts.next().and_then(|p| p.parse::<u32>().ok()), parts.next().and_then(|p| p.parse::<u32>().ok())) else {
        return false;
    };
    (maj, min) >= (major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison_handles_v_prefix_and_patch() {
        assert!(talos_version_at_least("v1.10.2", 1, 10));
        assert!(talos_version_at_least("1.12.0", 1, 10));
        assert!(!talos_version_at_least("1.9.9", 1, 10));
        assert!(!talos_version_at_least("garbage", 1, 10));
    }

    #[test]
    fn install_image_url_applies_platform_prefix_on_new_talos() {
        let client = ImageFactoryClient::new("https://factory.example.com");
        let url = client.install_image_url(&InstallImageParams {
            schematic_id: Some("abc123".into()),
            talos_version: "1.10.2".into(),
            platform: "metal".into(),
            secure_boot: true,
        });
        assert_eq!(url, "https://factory.example.com/metal-installer-secureboot/abc123:v1.10.2");
    }

    #[test]
    fn install_image_url_omits_platform_prefix_on_old_talos() {
        let client = ImageFactoryClient::new("https://factory.example.com");
        let url = client.install_image_url(&InstallImageParams {
            schematic_id: Some("abc123".into()),
            talos_version: "1.9.1".into(),
            platform: "metal".into(),
            secure_boot: false,
        });
        assert_eq!(url, "https://factory.example.com/installer/abc123:v1.9.1");
    }

    #[test]
    fn install_image_url_falls_back_to_plain_registry_for_invalid_schematic() {
        let client = ImageFactoryClient::new("https://factory.example.com");
        let url = client.install_image_url(&InstallImageParams {
            schematic_id: None,
            talos_version: "1.10.0".into(),
            platform: "metal".into(),
            secure_boot: false,
        });
        assert_eq!(url, "https://factory.example.com/metal-installer:v1.10.0");
    }
}

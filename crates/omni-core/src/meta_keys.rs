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

//! Resource-store meta-key constants (spec §6, bit-exact) and the
//! meta-partition image-labels YAML format (spec §6, invariant 5).

use serde::{Deserialize, Serialize};

pub const STATE_ENCRYPTION_CONFIG: u32 = 9;
pub const METAL_NETWORK_PLATFORM_CONFIG: u32 = 10;
pub const LABELS_META: u32 = 12;
pub const USER_RESERVED_2: u32 = 13;
pub const USER_RESERVED_3: u32 = 14;

/// True for the meta keys a client is allowed to write via `MetaWrite`
/// (spec §6).
#[must_use]
pub fn can_set_meta_key(key: u32) -> bool {
    matches!(
        key,
        METAL_NETWORK_PLATFORM_CONFIG | LABELS_META | USER_RESERVED_2 | USER_RESERVED_3
    )
}

/// The meta-partition image-labels document (spec §6): `{machineLabels:
/// {...}, machineInitialLabels: {...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ImageLabelsDocument {
    #[serde(default, rename = "machineLabels")]
    machine_labels: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, rename = "machineInitialLabels")]
    machine_initial_labels: Option<std::collections::BTreeMap<String, String>>,
}

/// Parses the meta-partition image-labels YAML, falling back to
/// `machineInitialLabels` when `machineLabels` is absent, trimming
/// whitespace around both keys and values (spec §6, invariant 5).
pub fn parse_image_labels(yaml: &str) -> Result<std::collections::BTreeMap<String, String>, serde_yaml::Error> {
    let doc: ImageLabelsDocument = serde_yaml::from_str(yaml)?;
    let chosen = doc.machine_labels.or(doc.machine_initial_labels).unwrap_or_default();
    Ok(chosen
        .into_iter()
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect())
}

/// Encodes a `machineLabels` document for writing back via `MetaWrite`.
#[must_use]
pub fn encode_image_labels(labels: &std::collections::BTreeMap<String, String>) -> String {
    let doc = ImageLabelsDocument {
        machine_labels: Some(labels.clone()),
        machine_initial_labels: None,
    };
    serde_yaml::to_string(&doc).expect("image labels document always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_set_meta_key_matches_spec_set() {
        assert!(!can_set_meta_key(STATE_ENCRYPTION_CONFIG));
        assert!(can_set_meta_key(METAL_NETWORK_PLATFORM_CONFIG));
        assert!(can_set_meta_key(LABELS_META));
        assert!(can_set_meta_key(USER_RESERVED_2));
        assert!(can_set_meta_key(USER_RESERVED_3));
        assert!(!can_set_meta_key(1));
    }

    #[test]
    fn parses_machine_labels_when_present() {
        let yaml = "machineLabels:\n  role: ' worker '\nmachineInitialLabels:\n  role: control-plane\n";
        let labels = parse_image_labels(yaml).unwrap();
        assert_eq!(labels.get("role").unwrap(), "worker");
    }

    #[test]
    fn falls_back_to_machine_initial_labels() {
        let yaml = "machineInitialLabels:\n  ' role ': controlplane\n";
        let labels = parse_image_labels(yaml).unwrap();
        assert_eq!(labels.get("role").unwrap(), "controlplane");
    }

    #[test]
    fn empty_document_parses_to_empty_map() {
        let labels = parse_image_labels("{}").unwrap();
        assert!(labels.is_empty());
    }
}

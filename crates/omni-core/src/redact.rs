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

//! Config redaction and diffing for the pending-updates surface (spec
//! §4.1.1 step 3, §4.1.6): replace secret fields with a redaction marker
//! and re-encode without comments, then compute a unified diff between
//! two redacted documents, excluding the `install` section (handled by
//! upgrades, not apply).

use serde_yaml::Value;
use similar::TextDiff;

const REDACTION_MARKER: &str = "***REDACTED***";

/// Field names treated as secret material wherever they appear in the
/// document, matched case-insensitively against the YAML mapping key.
const SECRET_FIELDS: &[&str] = &["token", "key", "secret", "crt", "cert", "ca", "password"];

/// Top-level section excluded from the pending-updates diff: install
/// image/schematic drift is surfaced via the upgrade record instead
/// (spec §4.1.6).
const INSTALL_SECTION: &str = "install";

/// Replaces secret fields with [`REDACTION_MARKER`] and re-encodes the
/// document without comments (re-serializing through `serde_yaml::Value`
/// naturally drops them).
#[must_use]
pub fn redact_machine_config(raw: &[u8]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return raw.to_vec();
    };
    let Ok(mut value) = serde_yaml::from_str::<Value>(text) else {
        return raw.to_vec();
    };
    redact_value(&mut value);
    serde_yaml::to_string(&value).unwrap_or_else(|_| text.to_string()).into_bytes()
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                let key_is_secret = k.as_str().is_some_and(|k| SECRET_FIELDS.iter().any(|s| k.to_lowercase().contains(s)));
                if key_is_secret && !matches!(v, Value::Mapping(_) | Value::Sequence(_)) {
                    *v = Value::String(REDACTION_MARKER.to_string());
                } else {
                    redact_value(v);
                }
            }
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                redact_value(item);
            }
        }
        _ => {}
    }
}

/// Strips the `install` top-level section, if present, from a redacted
/// document so pending-updates diffs don't duplicate upgrade drift
/// (spec §4.1.6).
fn without_install_section(raw: &[u8]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return raw.to_vec();
    };
    let Ok(mut value) = serde_yaml::from_str::<Value>(text) else {
        return raw.to_vec();
    };
    if let Value::Mapping(map) = &mut value {
        map.retain(|k, _| k.as_str() != Some(INSTALL_SECTION));
    }
    serde_yaml::to_string(&value).unwrap_or_else(|_| text.to_string()).into_bytes()
}

/// Computes a unified diff between the previous and new redacted config,
/// excluding the install section (spec §4.1.6). Returns an empty string
/// when the two documents are identical once that section is removed.
#[must_use]
pub fn config_diff(previous_redacted: &[u8], new_redacted: &[u8]) -> String {
    let before = without_install_section(previous_redacted);
    let after = without_install_section(new_redacted);
    if before == after {
        return String::new();
    }
    let before = String::from_utf8_lossy(&before);
    let after = String::from_utf8_lossy(&after);
    TextDiff::from_lines(before.as_ref(), after.as_ref())
        .unified_diff()
        .context_radius(3)
        .header("previous", "desired")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_secret_scalar_fields_and_drops_comments() {
        let input = b"# a comment\nmachine:\n  token: plaintext-secret\n  hostname: node-1\n";
        let redacted = redact_machine_config(input);
        let text = String::from_utf8(redacted).unwrap();
        assert!(text.contains(REDACTION_MARKER));
        assert!(!text.contains("plaintext-secret"));
        assert!(text.contains("node-1"));
        assert!(!text.contains('#'));
    }

    #[test]
    fn redaction_recurses_into_nested_mappings_and_sequences() {
        let input = b"cluster:\n  secrets:\n    - token: a\n    - token: b\n";
        let redacted = redact_machine_config(input);
        let text = String::from_utf8(redacted).unwrap();
        assert_eq!(text.matches(REDACTION_MARKER).count(), 2);
    }

    #[test]
    fn diff_excludes_install_section_changes() {
        let before = b"hostname: node-1\ninstall:\n  image: v1.9.0\n";
        let after = b"hostname: node-1\ninstall:\n  image: v1.10.0\n";
        assert_eq!(config_diff(before, after), "");
    }

    #[test]
    fn diff_reports_non_install_changes() {
        let before = b"hostname: node-1\n";
        let after = b"hostname: node-2\n";
        let diff = config_diff(before, after);
        assert!(diff.contains("node-1"));
        assert!(diff.contains("node-2"));
    }
}

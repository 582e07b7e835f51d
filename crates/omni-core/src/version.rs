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

//! Talos version string comparisons shared by the config-status and
//! upgrade-status controllers (spec §4.1.1 step 7, §4.1.3).

/// Parses the leading `major.minor.patch` components of a Talos version
/// string (`"v1.9.1"` / `"1.9.1"`). Missing components default to 0.
fn parse(version: &str) -> Option<(u32, u32, u32)> {
    let trimmed = version.trim_start_matches('v');
    let mut parts = trimmed.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let patch = parts.next().unwrap_or("0").parse().unwrap_or(0);
    Some((major, minor, patch))
}

/// True iff `version >= major.minor`. Unparsable input is treated as
/// below the threshold.
#[must_use]
pub fn at_least(version: &str, major: u32, minor: u32) -> bool {
    match parse(version) {
        Some((maj, min, _)) => (maj, min) >= (major, minor),
        None => false,
    }
}

/// Spec §9 open question 3: `stageUpgrade` currently encodes a single
/// workaround (kexec staging required for Talos 1.9.0-1.9.2), isolated
/// behind this one match arm so future version ranges are a one-line
/// change.
#[must_use]
pub fn should_stage_upgrade(version: &str) -> bool {
    match parse(version) {
        Some((1, 9, patch)) => patch <= 2,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_handles_v_prefix_and_missing_patch() {
        assert!(at_least("v1.10", 1, 10));
        assert!(at_least("1.12.3", 1, 10));
        assert!(!at_least("1.9.9", 1, 10));
        assert!(!at_least("garbage", 1, 10));
    }

    #[test]
    fn stage_upgrade_only_for_the_1_9_0_through_1_9_2_range() {
        assert!(should_stage_upgrade("1.9.0"));
        assert!(should_stage_upgrade("v1.9.2"));
        assert!(!should_stage_upgrade("1.9.3"));
        assert!(!should_stage_upgrade("1.10.0"));
        assert!(!should_stage_upgrade("1.8.9"));
    }
}

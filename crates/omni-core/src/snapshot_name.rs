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

//! Snapshot object naming (spec §6, invariant 6). The encrypted
//! etcd-backup subsystem itself (store abstraction, S3/FS back-ends,
//! age-based cipher) is an out-of-scope external collaborator (spec
//! §1), but its snapshot object names are bit-exact and consumed
//! elsewhere in the core, so the naming scheme alone lives here.

const PREFIX: &str = "FFFFFFFF";
const SUFFIX: &str = ".snapshot";

/// Builds a snapshot object name for `unix_seconds` such that later
/// timestamps sort *before* earlier ones lexically: the name embeds the
/// bitwise-inverted seconds-since-epoch, zero-padded to 16 hex digits.
#[must_use]
pub fn create_snapshot_name(unix_seconds: i64) -> String {
    let inverted = !(unix_seconds as u64);
    format!("{PREFIX}{inverted:016x}{SUFFIX}")
}

/// Recovers the unix-seconds timestamp embedded in a name produced by
/// [`create_snapshot_name`].
#[must_use]
pub fn parse_snapshot_name(name: &str) -> Option<i64> {
    let body = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    let inverted = u64::from_str_radix(body, 16).ok()?;
    Some(!inverted as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_timestamps_sort_before_earlier_ones() {
        let earlier = create_snapshot_name(1_000);
        let later = create_snapshot_name(2_000);
        assert!(later < earlier, "{later} should sort before {earlier}");
    }

    #[test]
    fn round_trips_at_second_granularity() {
        for t in [0_i64, 1, 1_700_000_000, 9_999_999_999] {
            let name = create_snapshot_name(t);
            assert_eq!(parse_snapshot_name(&name), Some(t));
        }
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(parse_snapshot_name("not-a-snapshot"), None);
        assert_eq!(parse_snapshot_name("FFFFFFFFzzzz.snapshot"), None);
    }
}

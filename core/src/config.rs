/*
 * Created on Fri Sep 22 2023
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Host-supplied configuration for the journal engine and the blkif core.
//!
//! Neither struct is ever constructed by this crate's own code outside of
//! `Default`; the embedding host loads a [`Configuration`] from YAML the way
//! `skyd` loads its own settings, then threads the sub-configs through to the
//! journal/xen modules.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    /// Stop replay at the first checksum mismatch. Turning this off is for
    /// an offline best-effort repair tool only; it is never the default and
    /// `revert` still reports [`crate::error::ErrorKind::Corrupt`] for the
    /// bad entry, it just continues replaying the rest.
    pub verify_checksums_on_revert: bool,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            verify_checksums_on_revert: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlkifSettings {
    /// Upper bound on `1 << order` ring pages a single blkif may map.
    pub max_ring_pages: usize,
    /// Minimum interval between successive stats-file refreshes.
    pub stats_refresh_secs: u64,
}

impl Default for BlkifSettings {
    fn default() -> Self {
        Self {
            max_ring_pages: 8,
            stats_refresh_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Configuration {
    pub journal: JournalSettings,
    pub blkif: BlkifSettings,
}

impl Configuration {
    /// Parse a YAML configuration document, falling back to defaults for any
    /// key left unspecified.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = Configuration::default();
        assert!(cfg.journal.verify_checksums_on_revert);
        assert_eq!(cfg.blkif.max_ring_pages, 8);
        assert_eq!(cfg.blkif.stats_refresh_secs, 30);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = Configuration::from_yaml("blkif:\n  stats_refresh_secs: 5\n").unwrap();
        assert_eq!(cfg.blkif.stats_refresh_secs, 5);
        assert_eq!(cfg.blkif.max_ring_pages, 8);
        assert!(cfg.journal.verify_checksums_on_revert);
    }
}

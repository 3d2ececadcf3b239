/*
 * Created on Sun Jan 07 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <nandansayan@outlook.com>
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

//! The VHD undo journal: a sidecar write-ahead log that snapshots metadata
//! (and, for `add_block`, a single newly allocated data block) before it is
//! mutated in place, so a crash mid-transaction can be rolled back to a
//! consistent VHD.

mod record;
pub mod engine;

pub use engine::{BlockJournalMode, Journal};
pub use record::{read_entry, write_entry};

use crate::codec::JournalEntry;

/// Bitwise complement of the wrapping byte sum of the entry (with its own
/// `checksum` field treated as zero) followed by its payload.
pub fn checksum(entry: &JournalEntry, payload: &[u8]) -> u32 {
    let mut zeroed = entry.clone();
    zeroed.checksum = 0;
    let wire = zeroed.to_wire_bytes();
    let mut sum: u32 = 0;
    for &b in wire.iter().chain(payload.iter()) {
        sum = sum.wrapping_add(b as u32);
    }
    !sum
}

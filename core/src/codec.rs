/*
 * Created on Sun Sep 03 2023
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

//! Byte-order codec for the two fixed-layout records the journal itself
//! defines: the journal header and the journal entry.
//!
//! The VHD footer/header/BAT/batmap are *not* re-encoded here — the journal
//! only ever moves their already on-disk (big-endian) bytes verbatim between
//! the VHD and the sidecar, treating them as opaque fixed-layout structs.
//! Conversion of those is the VHD primitive layer's own concern, out of
//! scope for this crate.

use crate::error::{ErrorKind, RuntimeResult};

pub const VHD_SECTOR_SIZE: u64 = 512;

/// Round a byte count up to the next multiple of the sector size, never
/// returning zero for a zero input (a zero-length region still occupies one
/// sector on the wire).
pub const fn secs_round_up_no_zero(bytes: u64) -> u64 {
    if bytes == 0 {
        VHD_SECTOR_SIZE
    } else {
        (bytes + VHD_SECTOR_SIZE - 1) / VHD_SECTOR_SIZE * VHD_SECTOR_SIZE
    }
}

/// The magic stamped on a journal sidecar's header.
pub const JOURNAL_HEADER_COOKIE: [u8; 8] = *b"tdvhdjnl";
/// The magic every in-flight journal entry is stamped with.
pub const JOURNAL_ENTRY_COOKIE: u64 = 0xDEAD_BEEF_CAFE_F00D;

/// The VHD footer cookie value that marks a transaction in flight.
pub const POISON_COOKIE: [u8; 8] = *b"poisond!";
/// The canonical VHD footer cookie, restored by `remove`.
pub const HD_COOKIE: [u8; 8] = *b"conectix";

pub const JOURNAL_HEADER_SIZE: usize = 8 + 16 + 4 + 8; // cookie + uuid + entries + footer_offset
pub const JOURNAL_ENTRY_SIZE: usize = 4 + 4 + 8 + 8 + 4; // type + size + offset + cookie + checksum

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum JournalEntryType {
    Footer = 0,
    Header = 1,
    Locator = 2,
    Bat = 3,
    BatmapHeader = 4,
    BatmapMap = 5,
    Data = 6,
}

impl JournalEntryType {
    pub const fn from_wire(v: u32) -> RuntimeResult<Self> {
        Ok(match v {
            0 => Self::Footer,
            1 => Self::Header,
            2 => Self::Locator,
            3 => Self::Bat,
            4 => Self::BatmapHeader,
            5 => Self::BatmapMap,
            6 => Self::Data,
            _ => return Err(crate::error::Error::new(ErrorKind::Corrupt)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalHeader {
    pub uuid: uuid::Uuid,
    pub entries: u32,
    pub footer_offset: u64,
}

impl JournalHeader {
    pub fn to_wire_bytes(&self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut buf = [0u8; JOURNAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&JOURNAL_HEADER_COOKIE);
        buf[8..24].copy_from_slice(self.uuid.as_bytes());
        buf[24..28].copy_from_slice(&self.entries.to_be_bytes());
        buf[28..36].copy_from_slice(&self.footer_offset.to_be_bytes());
        buf
    }

    pub fn from_wire_bytes(buf: &[u8; JOURNAL_HEADER_SIZE]) -> RuntimeResult<Self> {
        if buf[0..8] != JOURNAL_HEADER_COOKIE {
            return Err(ErrorKind::Corrupt.into());
        }
        let uuid = uuid::Uuid::from_slice(&buf[8..24]).map_err(|_| ErrorKind::Corrupt)?;
        let entries = u32::from_be_bytes(buf[24..28].try_into().unwrap());
        let footer_offset = u64::from_be_bytes(buf[28..36].try_into().unwrap());
        Ok(Self {
            uuid,
            entries,
            footer_offset,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub kind: JournalEntryType,
    pub size: u32,
    pub offset: u64,
    pub cookie: u64,
    pub checksum: u32,
}

impl JournalEntry {
    pub fn to_wire_bytes(&self) -> [u8; JOURNAL_ENTRY_SIZE] {
        let mut buf = [0u8; JOURNAL_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&(self.kind as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&self.size.to_be_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cookie.to_be_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    pub fn from_wire_bytes(buf: &[u8; JOURNAL_ENTRY_SIZE]) -> RuntimeResult<Self> {
        let kind = JournalEntryType::from_wire(u32::from_be_bytes(buf[0..4].try_into().unwrap()))?;
        let size = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let offset = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        let cookie = u64::from_be_bytes(buf[16..24].try_into().unwrap());
        let checksum = u32::from_be_bytes(buf[24..28].try_into().unwrap());
        Ok(Self {
            kind,
            size,
            offset,
            cookie,
            checksum,
        })
    }
}

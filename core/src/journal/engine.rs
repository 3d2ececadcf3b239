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

//! The undo-journal transaction engine: `create`/`open`/`add_block`/`commit`/
//! `revert`/`remove` over a sidecar `<vhd path>.journal` file.

use super::record::{read_entry, write_entry};
use crate::codec::{JournalEntry, JournalEntryType, JournalHeader, HD_COOKIE, JOURNAL_HEADER_SIZE, POISON_COOKIE};
use crate::config::JournalSettings;
use crate::error::{Error, ErrorKind, RuntimeResult};
use crate::io::{read_exact_seq, write_all_seq};
use crate::vhd::{VhdFile, VHD_FOOTER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

fn journal_path(vhd_path: &Path) -> PathBuf {
    let mut s = vhd_path.as_os_str().to_owned();
    s.push(".journal");
    PathBuf::from(s)
}

/// Which parts of an allocated block to snapshot before the caller mutates
/// it in place, passed to `add_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockJournalMode(u8);

impl BlockJournalMode {
    pub const METADATA: Self = Self(0b01);
    pub const DATA: Self = Self(0b10);
    pub const ALL: Self = Self(0b11);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BlockJournalMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An open undo-journal transaction over a single VHD.
#[derive(Debug)]
pub struct Journal<V> {
    vhd: V,
    sidecar: File,
    sidecar_path: PathBuf,
    header: JournalHeader,
    settings: JournalSettings,
}

impl<V: VhdFile> Journal<V> {
    /// Begin a new transaction: snapshot the VHD's current metadata into a
    /// freshly created sidecar, then poison the VHD footer so a crash before
    /// `commit` is unambiguous.
    pub fn create(vhd: V, vhd_path: impl AsRef<Path>, settings: JournalSettings) -> RuntimeResult<Self> {
        let sidecar_path = journal_path(vhd_path.as_ref());
        if sidecar_path.exists() {
            return Err(Error::new(ErrorKind::AlreadyExists));
        }
        let sidecar = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&sidecar_path)?;
        let mut journal = Self {
            vhd,
            sidecar,
            sidecar_path: sidecar_path.clone(),
            header: JournalHeader {
                uuid: uuid::Uuid::nil(),
                entries: 0,
                footer_offset: 0,
            },
            settings,
        };
        if let Err(e) = journal.init_transaction() {
            drop(journal.sidecar);
            std::fs::remove_file(&sidecar_path).ok();
            return Err(e);
        }
        Ok(journal)
    }

    fn init_transaction(&mut self) -> RuntimeResult<()> {
        let size = self.vhd.vhd_size()?;
        if size < VHD_FOOTER_SIZE {
            return Err(Error::new(ErrorKind::Corrupt));
        }
        self.header = JournalHeader {
            uuid: self.vhd.uuid(),
            entries: 0,
            footer_offset: size - VHD_FOOTER_SIZE,
        };
        self.write_journal_header()?;
        self.add_metadata()?;
        self.poison()
    }

    /// Recover an in-flight transaction left behind by a crash: undo whatever
    /// the sidecar remembers, then re-poison, since the sidecar (and thus the
    /// transaction) is still open.
    pub fn open(vhd: V, vhd_path: impl AsRef<Path>, settings: JournalSettings) -> RuntimeResult<Self> {
        let sidecar_path = journal_path(vhd_path.as_ref());
        libsky::term::warn(format_args!(
            "recovering in-flight journal transaction from {}",
            sidecar_path.display()
        ))
        .ok();
        let sidecar = OpenOptions::new().read(true).write(true).open(&sidecar_path)?;
        let mut journal = Self {
            vhd,
            sidecar,
            sidecar_path,
            header: JournalHeader {
                uuid: uuid::Uuid::nil(),
                entries: 0,
                footer_offset: 0,
            },
            settings,
        };
        journal.header = journal.read_journal_header()?;
        journal.restore_typed()?;
        journal.vhd.reopen()?;
        journal.poison()?;
        Ok(journal)
    }

    /// Snapshot a single allocated block (its bitmap and/or its data sectors)
    /// before the caller overwrites it in place. A no-op for an unallocated
    /// block — there is nothing in place yet to protect.
    pub fn add_block(&mut self, block: u32, mode: BlockJournalMode) -> RuntimeResult<()> {
        if !self.vhd.is_dynamic() {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let entries = self.vhd.bat_entries()?;
        if block >= entries {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let sector = self.vhd.bat_entry(block)?;
        if sector == crate::vhd::DD_BLK_UNUSED {
            return Ok(());
        }
        let (bm_secs, spb) = self.vhd.block_geometry()?;
        let base = (sector as u64) * crate::codec::VHD_SECTOR_SIZE;

        if mode.contains(BlockJournalMode::METADATA) {
            let bitmap = self.vhd.read_bitmap(block)?;
            debug_assert_eq!(bitmap.len() as u64, bm_secs as u64 * crate::codec::VHD_SECTOR_SIZE);
            self.append(base, &bitmap, JournalEntryType::Data)?;
        }
        if mode.contains(BlockJournalMode::DATA) {
            let data_off = base + bm_secs as u64 * crate::codec::VHD_SECTOR_SIZE;
            let data = self.vhd.read_data_block(block)?;
            debug_assert_eq!(data.len() as u64, spb as u64 * crate::codec::VHD_SECTOR_SIZE);
            self.append(data_off, &data, JournalEntryType::Data)?;
        }
        Ok(())
    }

    /// The transaction completed: collapse the undo log to an empty,
    /// committed header. Leaves the footer poisoned and the sidecar on disk
    /// — call `remove` afterward to un-poison and unlink it.
    pub fn commit(&mut self) -> RuntimeResult<()> {
        self.header.entries = 0;
        self.write_journal_header()?;
        self.sidecar.set_len(JOURNAL_HEADER_SIZE as u64)?;
        Ok(())
    }

    /// The transaction failed: roll every journaled entry back onto the VHD.
    /// Leaves the footer poisoned and the sidecar on disk — call `remove`
    /// afterward to un-poison and unlink it.
    pub fn revert(&mut self) -> RuntimeResult<()> {
        self.sidecar.seek(SeekFrom::Start(JOURNAL_HEADER_SIZE as u64))?;
        for _ in 0..self.header.entries {
            let entry = read_entry(&mut self.sidecar)?;
            let mut payload = vec![0u8; entry.size as usize];
            read_exact_seq(&self.sidecar, &mut payload)?;
            let sum = super::checksum(&entry, &payload);
            if sum != entry.checksum {
                if self.settings.verify_checksums_on_revert {
                    return Err(Error::new(ErrorKind::Corrupt));
                }
                log::warn!("journal entry checksum mismatch during revert, skipping");
                continue;
            }
            self.vhd.write_at(entry.offset, &payload)?;
        }
        let len = self.header.footer_offset + VHD_FOOTER_SIZE;
        self.vhd.truncate(len)?;
        Ok(())
    }

    /// Un-poison the footer and unlink the sidecar, the way the attach path
    /// finishes off either a just-committed/-reverted journal or a stale,
    /// already-committed one it found on open. Never replays anything.
    pub fn remove(mut self) -> RuntimeResult<()> {
        self.unpoison()?;
        std::fs::remove_file(&self.sidecar_path)?;
        Ok(())
    }

    // -- internal plumbing -------------------------------------------------

    fn write_journal_header(&mut self) -> RuntimeResult<()> {
        self.sidecar.seek(SeekFrom::Start(0))?;
        write_all_seq(&self.sidecar, &self.header.to_wire_bytes())
    }

    fn read_journal_header(&mut self) -> RuntimeResult<JournalHeader> {
        self.sidecar.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; JOURNAL_HEADER_SIZE];
        read_exact_seq(&self.sidecar, &mut buf)?;
        JournalHeader::from_wire_bytes(&buf)
    }

    /// Append one entry + its payload at EOF, bumping and persisting the
    /// header's entry count. On any failure the sidecar is truncated back to
    /// its pre-append length so a partial append never survives.
    fn append(&mut self, offset: u64, payload: &[u8], kind: JournalEntryType) -> RuntimeResult<()> {
        self.sidecar.seek(SeekFrom::End(0))?;
        let eof = self.sidecar.stream_position()?;

        let mut entry = JournalEntry {
            kind,
            size: payload.len() as u32,
            offset,
            cookie: crate::codec::JOURNAL_ENTRY_COOKIE,
            checksum: 0,
        };
        entry.checksum = super::checksum(&entry, payload);

        let result = (|| -> RuntimeResult<()> {
            write_entry(&mut self.sidecar, &entry)?;
            write_all_seq(&self.sidecar, payload)?;
            self.header.entries += 1;
            if let Err(e) = self.write_journal_header() {
                self.header.entries -= 1;
                return Err(e);
            }
            Ok(())
        })();

        if result.is_err() {
            self.sidecar.set_len(eof).ok();
        }
        result
    }

    fn add_metadata(&mut self) -> RuntimeResult<()> {
        self.add_footer()?;
        if !self.vhd.is_dynamic() {
            return Ok(());
        }
        self.add_header()?;
        self.add_locators()?;
        self.add_bat()?;
        if self.vhd.has_batmap() {
            self.add_batmap()?;
        }
        Ok(())
    }

    fn add_footer(&mut self) -> RuntimeResult<()> {
        let footer = self.vhd.read_footer()?;
        self.append(self.header.footer_offset, &footer, JournalEntryType::Footer)
    }

    fn add_header(&mut self) -> RuntimeResult<()> {
        let header = self.vhd.read_header()?;
        let off = self.vhd.data_offset()?;
        self.append(off, &header, JournalEntryType::Header)
    }

    fn add_locators(&mut self) -> RuntimeResult<()> {
        for (offset, len) in self.vhd.locator_slots()? {
            let buf = self.vhd.read_at(offset, len)?;
            self.append(offset, &buf, JournalEntryType::Locator)?;
        }
        Ok(())
    }

    fn add_bat(&mut self) -> RuntimeResult<()> {
        let bat = self.vhd.read_bat()?;
        let off = self.vhd.bat_table_offset()?;
        self.append(off, &bat, JournalEntryType::Bat)
    }

    fn add_batmap(&mut self) -> RuntimeResult<()> {
        let header_off = self.vhd.batmap_header_offset()?;
        let header = self.vhd.read_batmap_header()?;
        self.append(header_off, &header, JournalEntryType::BatmapHeader)?;

        let (map_off, map_len) = self.vhd.batmap_map_location()?;
        let map = self.vhd.read_batmap_map(map_off, map_len)?;
        self.append(map_off, &map, JournalEntryType::BatmapMap)
    }

    /// Read one entry + payload expected to be `want`, verifying its
    /// checksum. Used by the typed recovery path, which (unlike `revert`)
    /// always enforces entry order.
    fn read_typed(&mut self, want: JournalEntryType) -> RuntimeResult<(JournalEntry, Vec<u8>)> {
        let entry = read_entry(&mut self.sidecar)?;
        if entry.kind != want {
            return Err(Error::new(ErrorKind::Corrupt));
        }
        let mut payload = vec![0u8; entry.size as usize];
        read_exact_seq(&self.sidecar, &mut payload)?;
        if super::checksum(&entry, &payload) != entry.checksum {
            return Err(Error::new(ErrorKind::Corrupt));
        }
        Ok((entry, payload))
    }

    fn restore_typed(&mut self) -> RuntimeResult<()> {
        self.sidecar.seek(SeekFrom::Start(JOURNAL_HEADER_SIZE as u64))?;

        let (footer_entry, footer) = self.read_typed(JournalEntryType::Footer)?;
        self.vhd.validate_footer(&footer)?;
        self.vhd.write_footer_at(&footer, footer_entry.offset)?;
        if self.vhd.is_dynamic() {
            self.vhd.write_footer_at(&footer, 0)?;
        } else {
            self.finish_restore()?;
            return Ok(());
        }

        let (_, header) = self.read_typed(JournalEntryType::Header)?;
        self.vhd.validate_header(&header)?;
        let data_offset = self.vhd.data_offset()?;
        self.vhd.write_header_at(&header, data_offset)?;

        loop {
            let mark = self.sidecar.stream_position()?;
            let entry = read_entry(&mut self.sidecar)?;
            if entry.kind != JournalEntryType::Locator {
                self.sidecar.seek(SeekFrom::Start(mark))?;
                break;
            }
            let mut payload = vec![0u8; entry.size as usize];
            read_exact_seq(&self.sidecar, &mut payload)?;
            if super::checksum(&entry, &payload) != entry.checksum {
                return Err(Error::new(ErrorKind::Corrupt));
            }
            self.vhd.write_at(entry.offset, &payload)?;
        }

        let (_, bat) = self.read_typed(JournalEntryType::Bat)?;
        self.vhd.write_bat(&bat)?;

        if self.vhd.has_batmap() {
            let (_, batmap_header) = self.read_typed(JournalEntryType::BatmapHeader)?;
            self.vhd.validate_batmap_header(&batmap_header)?;
            let bh_offset = self.vhd.batmap_header_offset()?;
            self.vhd.write_batmap_header_at(&batmap_header, bh_offset)?;

            let (map_entry, map) = self.read_typed(JournalEntryType::BatmapMap)?;
            self.vhd.write_batmap_map_at(&map, map_entry.offset)?;
        }

        self.finish_restore()
    }

    fn finish_restore(&mut self) -> RuntimeResult<()> {
        self.vhd.truncate(self.header.footer_offset + VHD_FOOTER_SIZE)
    }

    fn poison(&mut self) -> RuntimeResult<()> {
        self.stamp_cookie(POISON_COOKIE)
    }

    fn unpoison(&mut self) -> RuntimeResult<()> {
        self.stamp_cookie(HD_COOKIE)
    }

    fn stamp_cookie(&mut self, cookie: [u8; 8]) -> RuntimeResult<()> {
        let mut footer = self.vhd.read_footer()?;
        footer[0..8].copy_from_slice(&cookie);
        let size = self.vhd.vhd_size()?;
        let offset = size - VHD_FOOTER_SIZE;
        self.vhd.write_footer_at(&footer, offset)?;
        if self.vhd.is_dynamic() {
            self.vhd.write_footer_at(&footer, 0)?;
        }
        Ok(())
    }
}

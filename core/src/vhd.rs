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

//! The VHD primitive layer seam: consumed by the journal engine, out of
//! scope for this crate to implement.
//!
//! The journal engine never parses VHD footer/header/BAT/batmap fields; it
//! moves their already on-disk bytes verbatim. [`VhdFile`] is exactly the cut
//! a real libvhd-style implementation would sit behind. [`mock::FileBackedVhd`]
//! is a minimal, self-consistent test double good enough to drive the journal
//! engine end to end; it is not a real VHD parser.

use crate::error::RuntimeResult;

pub const VHD_FOOTER_SIZE: u64 = 512;
pub const VHD_HEADER_SIZE: u64 = 1024;
/// Sentinel BAT entry value meaning "this logical block has never been allocated".
pub const DD_BLK_UNUSED: u32 = u32::MAX;

/// Operations the journal engine needs from an already-open VHD file.
///
/// All offsets are absolute byte offsets into the VHD file. All `raw` byte
/// buffers are already in their on-disk (big-endian) representation; this
/// trait's implementor owns the `*_in`/`*_out` codecs for those structures,
/// not the journal.
pub trait VhdFile {
    /// True for a dynamic (sparse) VHD; false for a fixed-size VHD.
    fn is_dynamic(&self) -> bool;
    /// True if this dynamic VHD carries a batmap extension.
    fn has_batmap(&self) -> bool;
    /// Current end-of-file offset (footer sits at `vhd_size - VHD_FOOTER_SIZE`).
    fn vhd_size(&mut self) -> RuntimeResult<u64>;
    /// The VHD's UUID, copied into the journal header on create.
    fn uuid(&self) -> uuid::Uuid;
    /// `footer.data_offset` — where the dynamic header lives.
    fn data_offset(&mut self) -> RuntimeResult<u64>;

    fn read_footer(&mut self) -> RuntimeResult<Vec<u8>>;
    /// Write `raw` as the footer at `offset` (used both for the primary
    /// footer and, for dynamic VHDs, the footer copy at offset 0).
    fn write_footer_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()>;
    fn validate_footer(&self, raw: &[u8]) -> RuntimeResult<()>;

    fn read_header(&mut self) -> RuntimeResult<Vec<u8>>;
    fn write_header_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()>;
    fn validate_header(&self, raw: &[u8]) -> RuntimeResult<()>;

    /// Non-empty parent-locator slots, in on-disk slot order: `(byte offset,
    /// byte length)`. Validates each slot's platform code as a side effect
    /// (mirrors `validate_platform_code` in the consumed interface list).
    fn locator_slots(&mut self) -> RuntimeResult<Vec<(u64, u64)>>;

    fn bat_table_offset(&mut self) -> RuntimeResult<u64>;
    fn bat_entries(&mut self) -> RuntimeResult<u32>;
    fn read_bat(&mut self) -> RuntimeResult<Vec<u8>>;
    fn write_bat(&mut self, raw: &[u8]) -> RuntimeResult<()>;
    /// Resolve `bat[block]`, [`DD_BLK_UNUSED`] if never allocated.
    fn bat_entry(&mut self, block: u32) -> RuntimeResult<u32>;

    /// Sectors-per-block and bitmap-sectors-per-block, needed by `add_block`.
    fn block_geometry(&mut self) -> RuntimeResult<(u32, u32)>; // (bm_secs, spb)

    fn batmap_header_offset(&mut self) -> RuntimeResult<u64>;
    fn read_batmap_header(&mut self) -> RuntimeResult<Vec<u8>>;
    fn write_batmap_header_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()>;
    fn validate_batmap_header(&self, raw: &[u8]) -> RuntimeResult<()>;
    /// Where the batmap bitmap itself lives: `(byte offset, byte length)`.
    /// Must be callable right after `read_batmap_header`/`write_header_at`
    /// with a BATMAP_H payload, i.e. it reflects whatever header bytes are
    /// currently live, not a cached value from VHD open time.
    fn batmap_map_location(&mut self) -> RuntimeResult<(u64, u64)>;
    fn read_batmap_map(&mut self, offset: u64, len: u64) -> RuntimeResult<Vec<u8>>;
    fn write_batmap_map_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()>;

    fn read_bitmap(&mut self, block: u32) -> RuntimeResult<Vec<u8>>;
    fn read_data_block(&mut self, block: u32) -> RuntimeResult<Vec<u8>>;

    /// Generic positioned read, used to restore arbitrary entries (locators,
    /// data blocks) whose destination the journal already knows.
    fn read_at(&mut self, offset: u64, len: u64) -> RuntimeResult<Vec<u8>>;
    fn write_at(&mut self, offset: u64, raw: &[u8]) -> RuntimeResult<()>;

    /// Truncate the VHD file to exactly `len` bytes (used by revert/open to
    /// drop anything appended past the original footer).
    fn truncate(&mut self, len: u64) -> RuntimeResult<()>;
    /// Close and reopen so any in-core caches are rebuilt from on-disk bytes.
    /// A no-op for implementations with no such cache.
    fn reopen(&mut self) -> RuntimeResult<()>;
}

pub mod mock {
    //! An in-memory-geometry, on-disk-bytes VHD double used by this crate's
    //! own tests. Not a real VHD implementation: bitmap/batmap contents are
    //! whatever the test wrote, block addressing is a simple fixed stride.
    use super::*;
    use crate::error::ErrorKind;
    use crate::io::{pread_exact_at, pwrite_all_at};
    use std::fs::{File, OpenOptions};
    use std::path::{Path, PathBuf};

    pub const SECTOR: u64 = 512;

    #[derive(Debug, Clone, Copy)]
    pub struct Geometry {
        pub dynamic: bool,
        pub has_batmap: bool,
        pub bat_entries: u32,
        pub bm_secs: u32,
        pub spb: u32,
    }

    /// Fixed layout used by the mock, sector-aligned throughout:
    /// `[footer@0 if dynamic][header][BAT][batmap header][batmap map][blocks...][footer]`
    #[derive(Debug)]
    pub struct FileBackedVhd {
        path: PathBuf,
        file: File,
        geom: Geometry,
        uuid: uuid::Uuid,
        header_offset: u64,
        bat_offset: u64,
        batmap_header_offset: u64,
        batmap_map_offset: u64,
        batmap_map_len: u64,
        blocks_offset: u64,
        block_stride: u64,
    }

    impl FileBackedVhd {
        pub fn create(path: impl AsRef<Path>, geom: Geometry) -> RuntimeResult<Self> {
            let path = path.as_ref().to_path_buf();
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&path)?;
            let header_offset = if geom.dynamic { SECTOR } else { 0 };
            let bat_offset = header_offset + VHD_HEADER_SIZE;
            let bat_len =
                crate::codec::secs_round_up_no_zero(geom.bat_entries as u64 * 4);
            let batmap_header_offset = bat_offset + bat_len;
            let batmap_header_len = crate::codec::secs_round_up_no_zero(64);
            let batmap_map_len = if geom.has_batmap {
                crate::codec::secs_round_up_no_zero(((geom.bat_entries as u64) + 7) / 8)
            } else {
                0
            };
            let batmap_map_offset = batmap_header_offset + batmap_header_len;
            let blocks_offset = if geom.has_batmap {
                batmap_map_offset + batmap_map_len
            } else {
                batmap_header_offset
            };
            let block_stride = (geom.bm_secs as u64 + geom.spb as u64) * SECTOR;
            let mut me = Self {
                path,
                file,
                geom,
                uuid: uuid::Uuid::new_v4(),
                header_offset,
                bat_offset,
                batmap_header_offset,
                batmap_map_offset,
                batmap_map_len,
                blocks_offset,
                block_stride,
            };
            let end = blocks_offset + block_stride * geom.bat_entries as u64;
            me.file.set_len(end + VHD_FOOTER_SIZE)?;
            // unused BAT initialized to DD_BLK_UNUSED
            let mut bat_raw = vec![0xFFu8; bat_len as usize];
            for i in 0..geom.bat_entries {
                bat_raw[(i as usize) * 4..(i as usize) * 4 + 4]
                    .copy_from_slice(&DD_BLK_UNUSED.to_be_bytes());
            }
            pwrite_all_at(&me.file, &bat_raw, bat_offset)?;
            if geom.dynamic {
                me.stamp_footer(0)?;
            }
            me.stamp_footer(end)?;
            Ok(me)
        }

        fn stamp_footer(&mut self, offset: u64) -> RuntimeResult<()> {
            let mut footer = vec![0u8; VHD_FOOTER_SIZE as usize];
            footer[0..8].copy_from_slice(&crate::codec::HD_COOKIE);
            footer[8..24].copy_from_slice(self.uuid.as_bytes());
            footer[24..32].copy_from_slice(&self.header_offset.to_be_bytes());
            pwrite_all_at(&self.file, &footer, offset)
        }

        /// Allocate block `n` at its fixed slot and mark it used in the BAT.
        pub fn allocate_block(&mut self, n: u32) -> RuntimeResult<()> {
            let blk_sector = (self.blocks_offset + self.block_stride * n as u64) / SECTOR;
            let entry_off = self.bat_offset + (n as u64) * 4;
            pwrite_all_at(&self.file, &(blk_sector as u32).to_be_bytes(), entry_off)
        }

        /// Open a handle onto a file a prior [`FileBackedVhd::create`] call
        /// laid out, without touching its contents. `geom` must match what
        /// the file was created with — layout offsets are derived from it,
        /// not stored on disk.
        pub fn open(path: impl AsRef<Path>, geom: Geometry) -> RuntimeResult<Self> {
            let path = path.as_ref().to_path_buf();
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let header_offset = if geom.dynamic { SECTOR } else { 0 };
            let bat_offset = header_offset + VHD_HEADER_SIZE;
            let bat_len = crate::codec::secs_round_up_no_zero(geom.bat_entries as u64 * 4);
            let batmap_header_offset = bat_offset + bat_len;
            let batmap_header_len = crate::codec::secs_round_up_no_zero(64);
            let batmap_map_len = if geom.has_batmap {
                crate::codec::secs_round_up_no_zero(((geom.bat_entries as u64) + 7) / 8)
            } else {
                0
            };
            let batmap_map_offset = batmap_header_offset + batmap_header_len;
            let blocks_offset = if geom.has_batmap {
                batmap_map_offset + batmap_map_len
            } else {
                batmap_header_offset
            };
            let block_stride = (geom.bm_secs as u64 + geom.spb as u64) * SECTOR;
            let mut footer = [0u8; 16];
            pread_exact_at(&file, &mut footer, 8)?;
            let uuid = uuid::Uuid::from_slice(&footer).unwrap_or_else(|_| uuid::Uuid::nil());
            Ok(Self {
                path,
                file,
                geom,
                uuid,
                header_offset,
                bat_offset,
                batmap_header_offset,
                batmap_map_offset,
                batmap_map_len,
                blocks_offset,
                block_stride,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn footer_offset(&self) -> u64 {
            self.blocks_offset + self.block_stride * self.geom.bat_entries as u64
        }
    }

    impl VhdFile for FileBackedVhd {
        fn is_dynamic(&self) -> bool {
            self.geom.dynamic
        }
        fn has_batmap(&self) -> bool {
            self.geom.has_batmap
        }
        fn vhd_size(&mut self) -> RuntimeResult<u64> {
            Ok(self.file.metadata()?.len())
        }
        fn uuid(&self) -> uuid::Uuid {
            self.uuid
        }
        fn data_offset(&mut self) -> RuntimeResult<u64> {
            Ok(self.header_offset)
        }
        fn read_footer(&mut self) -> RuntimeResult<Vec<u8>> {
            self.read_at(self.footer_offset(), VHD_FOOTER_SIZE)
        }
        fn write_footer_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()> {
            self.write_at(offset, raw)
        }
        fn validate_footer(&self, raw: &[u8]) -> RuntimeResult<()> {
            if raw.len() as u64 != VHD_FOOTER_SIZE {
                return Err(ErrorKind::Corrupt.into());
            }
            Ok(())
        }
        fn read_header(&mut self) -> RuntimeResult<Vec<u8>> {
            self.read_at(self.header_offset, VHD_HEADER_SIZE)
        }
        fn write_header_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()> {
            self.write_at(offset, raw)
        }
        fn validate_header(&self, raw: &[u8]) -> RuntimeResult<()> {
            if raw.len() as u64 != VHD_HEADER_SIZE {
                return Err(ErrorKind::Corrupt.into());
            }
            Ok(())
        }
        fn locator_slots(&mut self) -> RuntimeResult<Vec<(u64, u64)>> {
            // the mock never carries parent locators (no differencing disks)
            Ok(Vec::new())
        }
        fn bat_table_offset(&mut self) -> RuntimeResult<u64> {
            Ok(self.bat_offset)
        }
        fn bat_entries(&mut self) -> RuntimeResult<u32> {
            Ok(self.geom.bat_entries)
        }
        fn read_bat(&mut self) -> RuntimeResult<Vec<u8>> {
            let len = crate::codec::secs_round_up_no_zero(self.geom.bat_entries as u64 * 4);
            self.read_at(self.bat_offset, len)
        }
        fn write_bat(&mut self, raw: &[u8]) -> RuntimeResult<()> {
            self.write_at(self.bat_offset, raw)
        }
        fn bat_entry(&mut self, block: u32) -> RuntimeResult<u32> {
            if block >= self.geom.bat_entries {
                return Err(ErrorKind::InvalidArgument.into());
            }
            let mut buf = [0u8; 4];
            pread_exact_at(&self.file, &mut buf, self.bat_offset + (block as u64) * 4)?;
            Ok(u32::from_be_bytes(buf))
        }
        fn block_geometry(&mut self) -> RuntimeResult<(u32, u32)> {
            Ok((self.geom.bm_secs, self.geom.spb))
        }
        fn batmap_header_offset(&mut self) -> RuntimeResult<u64> {
            Ok(self.batmap_header_offset)
        }
        fn read_batmap_header(&mut self) -> RuntimeResult<Vec<u8>> {
            let len = crate::codec::secs_round_up_no_zero(64);
            self.read_at(self.batmap_header_offset, len)
        }
        fn write_batmap_header_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()> {
            self.write_at(offset, raw)
        }
        fn validate_batmap_header(&self, raw: &[u8]) -> RuntimeResult<()> {
            if raw.len() < 16 {
                return Err(ErrorKind::Corrupt.into());
            }
            Ok(())
        }
        fn batmap_map_location(&mut self) -> RuntimeResult<(u64, u64)> {
            Ok((self.batmap_map_offset, self.batmap_map_len))
        }
        fn read_batmap_map(&mut self, offset: u64, len: u64) -> RuntimeResult<Vec<u8>> {
            self.read_at(offset, len)
        }
        fn write_batmap_map_at(&mut self, raw: &[u8], offset: u64) -> RuntimeResult<()> {
            self.write_at(offset, raw)
        }
        fn read_bitmap(&mut self, block: u32) -> RuntimeResult<Vec<u8>> {
            let off = self.blocks_offset + self.block_stride * block as u64;
            self.read_at(off, self.geom.bm_secs as u64 * SECTOR)
        }
        fn read_data_block(&mut self, block: u32) -> RuntimeResult<Vec<u8>> {
            let off = self.blocks_offset
                + self.block_stride * block as u64
                + self.geom.bm_secs as u64 * SECTOR;
            self.read_at(off, self.geom.spb as u64 * SECTOR)
        }
        fn read_at(&mut self, offset: u64, len: u64) -> RuntimeResult<Vec<u8>> {
            let mut buf = vec![0u8; len as usize];
            pread_exact_at(&self.file, &mut buf, offset)?;
            Ok(buf)
        }
        fn write_at(&mut self, offset: u64, raw: &[u8]) -> RuntimeResult<()> {
            pwrite_all_at(&self.file, raw, offset)
        }
        fn truncate(&mut self, len: u64) -> RuntimeResult<()> {
            self.file.set_len(len)?;
            Ok(())
        }
        fn reopen(&mut self) -> RuntimeResult<()> {
            self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            Ok(())
        }
    }
}

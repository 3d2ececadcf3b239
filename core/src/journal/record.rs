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

//! Entry-record I/O against the sidecar's current cursor position. The
//! sidecar is only ever appended to and replayed sequentially, so this
//! layer doesn't need positioned I/O (that's `codec.rs` plus `io.rs`'s
//! `*_seq` helpers instead).

use crate::codec::{JournalEntry, JournalEntry as Entry, JOURNAL_ENTRY_COOKIE, JOURNAL_ENTRY_SIZE, VHD_SECTOR_SIZE};
use crate::error::{ErrorKind, RuntimeResult};
use crate::io::{read_exact_seq, write_all_seq};
use std::fs::File;

fn validate_shape(entry: &Entry) -> RuntimeResult<()> {
    if entry.cookie != JOURNAL_ENTRY_COOKIE {
        return Err(ErrorKind::Corrupt.into());
    }
    if entry.size == 0 || entry.size as u64 % VHD_SECTOR_SIZE != 0 {
        return Err(ErrorKind::Corrupt.into());
    }
    Ok(())
}

/// Append one entry record (not its payload — the caller writes that
/// separately with `write_all_seq`) at the sidecar's current cursor.
pub fn write_entry(journal: &mut File, entry: &JournalEntry) -> RuntimeResult<()> {
    validate_shape(entry).map_err(|_| ErrorKind::InvalidArgument)?;
    write_all_seq(journal, &entry.to_wire_bytes())
}

/// Read one entry record at the sidecar's current cursor. The caller is
/// responsible for then reading exactly `entry.size` payload bytes before
/// touching the cursor again.
pub fn read_entry(journal: &mut File) -> RuntimeResult<JournalEntry> {
    let mut buf = [0u8; JOURNAL_ENTRY_SIZE];
    read_exact_seq(journal, &mut buf)?;
    let entry = JournalEntry::from_wire_bytes(&buf)?;
    validate_shape(&entry)?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JournalEntryType;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom};

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tapdisk-core-record-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn write_then_read_entry_roundtrip() {
        let path = tmp_path("roundtrip");
        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let entry = JournalEntry {
            kind: JournalEntryType::Bat,
            size: 512,
            offset: 4096,
            cookie: JOURNAL_ENTRY_COOKIE,
            checksum: 0xDEAD,
        };
        write_entry(&mut f, &entry).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let back = read_entry(&mut f).unwrap();
        assert_eq!(entry, back);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_entry_rejects_unaligned_size() {
        let path = tmp_path("unaligned");
        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let entry = JournalEntry {
            kind: JournalEntryType::Data,
            size: 513,
            offset: 0,
            cookie: JOURNAL_ENTRY_COOKIE,
            checksum: 0,
        };
        let err = write_entry(&mut f, &entry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_entry_rejects_bad_cookie() {
        let path = tmp_path("badcookie");
        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let mut entry = JournalEntry {
            kind: JournalEntryType::Footer,
            size: 512,
            offset: 0,
            cookie: JOURNAL_ENTRY_COOKIE,
            checksum: 0,
        };
        entry.cookie = 0;
        write_all_seq(&f, &entry.to_wire_bytes()).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let err = read_entry(&mut f).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        std::fs::remove_file(&path).ok();
    }
}

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

//! End-to-end scenarios over the public API, driven by a real temp-file
//! backed VHD double rather than a virtual filesystem — the journal's job is
//! specifically to interact with real file offsets and `ftruncate`.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tapdisk_core::codec::{
    secs_round_up_no_zero, JOURNAL_ENTRY_SIZE, JOURNAL_HEADER_SIZE, VHD_SECTOR_SIZE,
};
use tapdisk_core::config::{BlkifSettings, JournalSettings};
use tapdisk_core::error::ErrorKind;
use tapdisk_core::vhd::mock::{FileBackedVhd, Geometry};
use tapdisk_core::vhd::{VhdFile, VHD_FOOTER_SIZE, VHD_HEADER_SIZE};
use tapdisk_core::xen::xenctrl::mock::{MockEventChannel, MockGrantTable};
use tapdisk_core::xen::{connect, disconnect, Blkifs, Vbd, XenContextRegistry};
use tapdisk_core::{BlockJournalMode, Journal};

fn scratch_vhd(name: &str, geom: Geometry) -> (PathBuf, FileBackedVhd) {
    let path = std::env::temp_dir().join(format!(
        "tapdisk-core-scenario-{}-{}.vhd",
        std::process::id(),
        name
    ));
    std::fs::remove_file(&path).ok();
    let vhd = FileBackedVhd::create(&path, geom).unwrap();
    (path, vhd)
}

fn sidecar_path(vhd_path: &std::path::Path) -> PathBuf {
    let mut s = vhd_path.as_os_str().to_owned();
    s.push(".journal");
    PathBuf::from(s)
}

/// Scenario 1: create/commit cycle on a dynamic 8 MiB VHD with a 16-entry BAT.
#[test]
fn scenario_1_create_commit_cycle() {
    let geom = Geometry {
        dynamic: true,
        has_batmap: false,
        bat_entries: 16,
        bm_secs: 1,
        spb: 1024, // 16 * 1024 sectors * 512 = 8 MiB
    };
    let (path, vhd) = scratch_vhd("create-commit", geom);
    let sidecar = sidecar_path(&path);

    let mut journal = Journal::create(vhd, &path, JournalSettings::default()).unwrap();
    assert!(sidecar.exists());

    let bat_len = secs_round_up_no_zero(geom.bat_entries as u64 * 4);
    let expected = JOURNAL_HEADER_SIZE as u64
        + 3 * JOURNAL_ENTRY_SIZE as u64 // footer + header + bat entries, no locators/batmap
        + VHD_FOOTER_SIZE
        + VHD_HEADER_SIZE
        + bat_len;
    assert_eq!(std::fs::metadata(&sidecar).unwrap().len(), expected);

    journal.commit().unwrap();
    // committed but not yet removed: the sidecar still exists, collapsed to
    // just its header, and the footer is still poisoned.
    assert_eq!(std::fs::metadata(&sidecar).unwrap().len(), JOURNAL_HEADER_SIZE as u64);
    let mut probe = FileBackedVhd::open(&path, geom).unwrap();
    assert_eq!(&probe.read_footer().unwrap()[0..8], &tapdisk_core::codec::POISON_COOKIE);
    drop(probe);

    journal.remove().unwrap();
    assert!(!sidecar.exists());

    // remove is what restores the plain cookie; a clean commit on its own
    // leaves the footer poisoned, as asserted above.
    let mut reopened = FileBackedVhd::open(&path, geom).unwrap();
    let footer = reopened.read_footer().unwrap();
    assert_eq!(&footer[0..8], &tapdisk_core::codec::HD_COOKIE);

    std::fs::remove_file(&path).ok();
}

fn small_geom() -> Geometry {
    Geometry {
        dynamic: true,
        has_batmap: false,
        bat_entries: 4,
        bm_secs: 1,
        spb: 2,
    }
}

/// Scenario 2: add-block then revert restores the pre-transaction bytes.
#[test]
fn scenario_2_add_block_then_revert() {
    let (path, mut vhd) = scratch_vhd("add-block-revert", small_geom());
    vhd.allocate_block(3).unwrap();
    let original = vhd.read_data_block(3).unwrap();

    let mut journal = Journal::create(vhd, &path, JournalSettings::default()).unwrap();
    journal.add_block(3, BlockJournalMode::ALL).unwrap();

    // mutate through an independent handle onto the same file, the way a
    // concurrent writer would — the journal's own handle never needs to be
    // reached into from outside the crate.
    let mut probe = FileBackedVhd::open(&path, small_geom()).unwrap();
    let sector = probe.bat_entry(3).unwrap() as u64;
    let (bm_secs, _spb) = probe.block_geometry().unwrap();
    let data_off = sector * VHD_SECTOR_SIZE + bm_secs as u64 * VHD_SECTOR_SIZE;
    probe.write_at(data_off, &[0xAB; 1024]).unwrap();
    assert_ne!(probe.read_data_block(3).unwrap(), original);
    drop(probe);

    journal.revert().unwrap();
    journal.remove().unwrap();

    let mut reopened = FileBackedVhd::open(&path, small_geom()).unwrap();
    assert_eq!(reopened.read_data_block(3).unwrap(), original);
    std::fs::remove_file(&path).ok();
}

/// Scenario 3: a journal left behind by a crash is recovered on `open`, and
/// the footer is re-poisoned since the sidecar is still present afterward.
#[test]
fn scenario_3_crash_recovery() {
    let (path, mut vhd) = scratch_vhd("crash-recovery", small_geom());
    let footer_offset = vhd.footer_offset();
    let saved_footer = vhd.read_footer().unwrap();

    let journal = Journal::create(vhd, &path, JournalSettings::default()).unwrap();
    // simulate in-flight corruption through an independent handle: stomp the
    // live footer with zero bytes
    let mut probe = FileBackedVhd::open(&path, small_geom()).unwrap();
    probe
        .write_at(footer_offset, &vec![0u8; VHD_FOOTER_SIZE as usize])
        .unwrap();
    drop(probe);
    // crash: drop the handle without commit/revert, leaving the sidecar behind
    std::mem::forget(journal);

    let vhd2 = FileBackedVhd::open(&path, small_geom()).unwrap();
    let recovered = Journal::open(vhd2, &path, JournalSettings::default()).unwrap();

    let mut check = FileBackedVhd::open(&path, small_geom()).unwrap();
    assert_eq!(check.read_footer().unwrap(), saved_footer);
    assert_eq!(&check.read_footer().unwrap()[0..8], &tapdisk_core::codec::POISON_COOKIE);

    recovered.remove().unwrap();
    std::fs::remove_file(&path).ok();
}

/// Scenario 4: a flipped bit in the first entry's on-disk payload surfaces as
/// `Corrupt` during `revert`, and the VHD is left exactly as `create` made it
/// (nothing ever grows the VHD file in this flow; only the sidecar does).
#[test]
fn scenario_4_checksum_corruption() {
    let (path, mut vhd) = scratch_vhd("checksum-corruption", small_geom());
    let pre_len = vhd.vhd_size().unwrap();
    let mut journal = Journal::create(vhd, &path, JournalSettings::default()).unwrap();
    let sidecar = sidecar_path(&path);

    // first entry written by `create` is always the footer entry; flip one
    // bit in its payload, just past the entry record itself.
    let mut f = OpenOptions::new().read(true).write(true).open(&sidecar).unwrap();
    let payload_start = JOURNAL_HEADER_SIZE as u64 + JOURNAL_ENTRY_SIZE as u64;
    f.seek(SeekFrom::Start(payload_start)).unwrap();
    let mut byte = [0u8; 1];
    f.read_exact(&mut byte).unwrap();
    byte[0] ^= 0x01;
    f.seek(SeekFrom::Start(payload_start)).unwrap();
    f.write_all(&byte).unwrap();
    drop(f);

    let err = journal.revert().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);

    let mut reopened = FileBackedVhd::open(&path, small_geom()).unwrap();
    assert_eq!(reopened.vhd_size().unwrap(), pre_len);
    std::fs::remove_file(&path).ok();
    std::fs::remove_file(&sidecar).ok();
}

fn blkif_settings() -> BlkifSettings {
    BlkifSettings {
        max_ring_pages: 8,
        stats_refresh_secs: 30,
    }
}

/// Scenario 5: a second `connect` for an already-attached (domid, devid) is
/// rejected with `InvalidArgument`. `AlreadyExists` is reserved for a
/// journal sidecar already present at create time, a different condition.
#[test]
fn scenario_5_double_connect() {
    let mut registry: XenContextRegistry<MockEventChannel, MockGrantTable> = XenContextRegistry::new();
    let mut blkifs = Blkifs::new();
    let mut vbd = Vbd::default();
    let settings = blkif_settings();

    connect(
        &mut registry,
        &mut blkifs,
        MockEventChannel::default,
        MockGrantTable::default,
        7,
        768,
        &[1, 2],
        1,
        32,
        0,
        "pool-a",
        &mut vbd,
        &settings,
    )
    .unwrap();

    let err = connect(
        &mut registry,
        &mut blkifs,
        MockEventChannel::default,
        MockGrantTable::default,
        7,
        768,
        &[1, 2],
        1,
        32,
        0,
        "pool-a",
        &mut vbd,
        &settings,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    disconnect(&mut registry, &mut blkifs, &vbd, 7, 768).unwrap();
    tapdisk_core::xen::stats::remove(7, 768).ok();
}

/// Scenario 6: outstanding requests reject `disconnect` as `Busy`; once the
/// VBD is paused the same precondition instead surfaces as `Shutdown`.
#[test]
fn scenario_6_busy_then_shutdown_disconnect() {
    let mut registry: XenContextRegistry<MockEventChannel, MockGrantTable> = XenContextRegistry::new();
    let mut blkifs = Blkifs::new();
    let mut vbd = Vbd::default();
    let settings = blkif_settings();

    connect(
        &mut registry,
        &mut blkifs,
        MockEventChannel::default,
        MockGrantTable::default,
        9,
        512,
        &[1],
        0,
        32,
        0,
        "pool-b",
        &mut vbd,
        &settings,
    )
    .unwrap();
    blkifs.find_mut(9, 512).unwrap().n_reqs_free -= 1;

    let err = disconnect(&mut registry, &mut blkifs, &vbd, 9, 512).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    vbd.paused = true;
    let err = disconnect(&mut registry, &mut blkifs, &vbd, 9, 512).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shutdown);

    blkifs.find_mut(9, 512).unwrap().n_reqs_free += 1;
    disconnect(&mut registry, &mut blkifs, &vbd, 9, 512).unwrap();
    tapdisk_core::xen::stats::remove(9, 512).ok();
}

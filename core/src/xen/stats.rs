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

//! The ring stats publisher: a rate-limited, single-page text file a
//! host-side monitoring tool tails directly, bypassing the ring loop.

use super::blkif::Blkif;
use crate::config::BlkifSettings;
use crate::error::{Error, ErrorKind, RuntimeResult};
use crate::io::pwrite_all_at;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn dir_path(domid: u32, devid: u32) -> PathBuf {
    PathBuf::from(format!("/dev/shm/vbd3-{domid}-{devid}"))
}

fn file_path(domid: u32, devid: u32) -> PathBuf {
    dir_path(domid, devid).join("io_ring")
}

fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

/// Create the stats directory and a zero-filled one-page file, called once
/// during `connect`.
pub fn init(domid: u32, devid: u32) -> RuntimeResult<()> {
    match fs::create_dir(dir_path(domid, devid)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(file_path(domid, devid))?;
    file.set_len(page_size() as u64)?;
    Ok(())
}

/// Remove the stats file and, if it's now empty, its parent directory.
/// A missing file or directory is not an error.
pub fn remove(domid: u32, devid: u32) -> RuntimeResult<()> {
    match fs::remove_file(file_path(domid, devid)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    match fs::remove_dir(dir_path(domid, devid)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Refresh the stats page if at least `settings.stats_refresh_secs` have
/// passed since the last write; otherwise a no-op. A ring that has never
/// been connected (`blkif.ring.is_none()`) is also a no-op.
pub fn show_io_ring(blkif: &mut Blkif, settings: &BlkifSettings) -> RuntimeResult<()> {
    let ring = match &blkif.ring {
        Some(r) => r,
        None => return Ok(()),
    };

    let now = Instant::now();
    if let Some(last) = blkif.last_refresh {
        if now.duration_since(last) < Duration::from_secs(settings.stats_refresh_secs) {
            return Ok(());
        }
    }

    let idx = ring.indices();
    let text = format!(
        "nr_ents {}\nreq prod {} cons {} event {}\nrsp prod {} pvt {} event {}\n",
        idx.nr_ents, idx.req_prod, idx.req_cons, idx.req_event, idx.rsp_prod, idx.rsp_pvt, idx.rsp_event,
    );
    if text.len() > page_size() {
        // folded into Io: our error taxonomy has no distinct ENOBUFS kind
        return Err(Error::new(ErrorKind::Io));
    }

    let file = OpenOptions::new()
        .write(true)
        .open(file_path(blkif.id.domid, blkif.id.devid))?;
    pwrite_all_at(&file, text.as_bytes(), 0)?;
    blkif.last_refresh = Some(now);
    Ok(())
}

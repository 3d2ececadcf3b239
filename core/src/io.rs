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

//! Restartable positioned I/O.
//!
//! Every journal read/write goes through here instead of `File::read`/`write`
//! directly so short transfers and `EINTR` are retried in one place, for the
//! journal's raw file descriptor.

use crate::error::{ErrorKind, RuntimeResult};
use std::os::unix::io::AsRawFd;

/// Read exactly `buf.len()` bytes starting at `offset`, without disturbing
/// the file's shared cursor. Retries on `EINTR`; a short read (including
/// EOF before `buf` is full) is reported as [`ErrorKind::Io`].
pub fn pread_exact_at<F: AsRawFd>(f: &F, buf: &mut [u8], offset: u64) -> RuntimeResult<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let ret = unsafe {
            libc::pread(
                f.as_raw_fd(),
                buf[done..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - done,
                (offset as i64) + done as i64,
            )
        };
        match ret {
            0 => return Err(ErrorKind::Io.into()),
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ErrorKind::Io.into());
            }
            n => done += n as usize,
        }
    }
    Ok(())
}

/// Write exactly `buf.len()` bytes starting at `offset`, without disturbing
/// the file's shared cursor. Retries on `EINTR` and on short writes; a
/// non-retryable error is reported as [`ErrorKind::Io`].
pub fn pwrite_all_at<F: AsRawFd>(f: &F, buf: &[u8], offset: u64) -> RuntimeResult<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let ret = unsafe {
            libc::pwrite(
                f.as_raw_fd(),
                buf[done..].as_ptr() as *const libc::c_void,
                buf.len() - done,
                (offset as i64) + done as i64,
            )
        };
        match ret {
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ErrorKind::Io.into());
            }
            n => done += n as usize,
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes from `f`'s current cursor, advancing it.
/// Retries on `EINTR`; a short read is reported as [`ErrorKind::Io`].
pub fn read_exact_seq<F: AsRawFd>(f: &F, buf: &mut [u8]) -> RuntimeResult<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let ret = unsafe {
            libc::read(
                f.as_raw_fd(),
                buf[done..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - done,
            )
        };
        match ret {
            0 => return Err(ErrorKind::Io.into()),
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ErrorKind::Io.into());
            }
            n => done += n as usize,
        }
    }
    Ok(())
}

/// Write exactly `buf.len()` bytes at `f`'s current cursor, advancing it.
/// Retries on `EINTR` and on short writes.
pub fn write_all_seq<F: AsRawFd>(f: &F, buf: &[u8]) -> RuntimeResult<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let ret = unsafe {
            libc::write(
                f.as_raw_fd(),
                buf[done..].as_ptr() as *const libc::c_void,
                buf.len() - done,
            )
        };
        match ret {
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ErrorKind::Io.into());
            }
            n => done += n as usize,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tapdisk-core-io-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn pwrite_then_pread_roundtrip() {
        let path = tmp_path("roundtrip");
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        pwrite_all_at(&f, b"hello undo log", 512).unwrap();
        let mut buf = [0u8; 14];
        pread_exact_at(&f, &mut buf, 512).unwrap();
        assert_eq!(&buf, b"hello undo log");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn pread_past_eof_is_io_error() {
        let path = tmp_path("eof");
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        f.sync_all().ok();
        let mut buf = [0u8; 16];
        let err = pread_exact_at(&f, &mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writes_at_disjoint_offsets_do_not_clobber() {
        let path = tmp_path("disjoint");
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        pwrite_all_at(&f, &[0xAB; 512], 0).unwrap();
        pwrite_all_at(&f, &[0xCD; 512], 512).unwrap();
        let mut first = [0u8; 512];
        let mut second = [0u8; 512];
        pread_exact_at(&f, &mut first, 0).unwrap();
        pread_exact_at(&f, &mut second, 512).unwrap();
        assert!(first.iter().all(|&b| b == 0xAB));
        assert!(second.iter().all(|&b| b == 0xCD));
        drop(f);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sequential_write_then_read_advances_cursor() {
        let path = tmp_path("sequential");
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        write_all_seq(&f, b"abc").unwrap();
        write_all_seq(&f, b"def").unwrap();
        pread_exact_at(&f, &mut [0u8; 0], 0).unwrap();
        let mut buf = [0u8; 6];
        pread_exact_at(&f, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"abcdef");
        std::fs::remove_file(&path).ok();
    }
}

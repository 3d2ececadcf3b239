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

//! The Xen grant-table / event-channel seam.
//!
//! Real hypercalls live on the other side of these traits; this crate only
//! ever calls through them.

use crate::error::RuntimeResult;

pub trait EventChannel {
    /// Bind an interdomain event channel to `port` on `domid`, returning the
    /// local port handed back to the caller.
    fn bind_interdomain(&mut self, domid: u32, port: u32) -> RuntimeResult<u32>;
    fn unbind(&mut self, local_port: u32) -> RuntimeResult<()>;
}

pub trait GrantTable {
    /// Map `refs` from `domid` read/write into process memory, returning the
    /// mapping's base address and an opaque handle `munmap` needs back.
    fn map_domain_grant_refs(
        &mut self,
        domid: u32,
        refs: &[u32],
        writable: bool,
    ) -> RuntimeResult<(usize, u64)>;
    fn munmap(&mut self, handle: u64, vaddr: usize, n_pages: usize) -> RuntimeResult<()>;
}

pub mod mock {
    //! Page-granularity mock backed by real anonymous `mmap`, so ring-index
    //! arithmetic in `blkif.rs` can be exercised against real memory without
    //! a hypervisor.
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    pub const PAGE_SIZE: usize = 4096;

    #[derive(Default)]
    pub struct MockEventChannel {
        next_port: u32,
        bound: HashMap<u32, (u32, u32)>, // local_port -> (domid, remote port)
    }

    impl EventChannel for MockEventChannel {
        fn bind_interdomain(&mut self, domid: u32, port: u32) -> RuntimeResult<u32> {
            let local = self.next_port;
            self.next_port += 1;
            self.bound.insert(local, (domid, port));
            Ok(local)
        }

        fn unbind(&mut self, local_port: u32) -> RuntimeResult<()> {
            self.bound
                .remove(&local_port)
                .map(|_| ())
                .ok_or_else(|| ErrorKind::NotFound.into())
        }
    }

    #[derive(Default)]
    pub struct MockGrantTable {
        next_handle: u64,
        mappings: HashMap<u64, (usize, usize)>, // handle -> (addr, n_pages)
    }

    impl GrantTable for MockGrantTable {
        fn map_domain_grant_refs(
            &mut self,
            _domid: u32,
            refs: &[u32],
            _writable: bool,
        ) -> RuntimeResult<(usize, u64)> {
            let n_pages = refs.len();
            let len = n_pages * PAGE_SIZE;
            let addr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                return Err(ErrorKind::Io.into());
            }
            let handle = self.next_handle;
            self.next_handle += 1;
            self.mappings.insert(handle, (addr as usize, n_pages));
            Ok((addr as usize, handle))
        }

        fn munmap(&mut self, handle: u64, vaddr: usize, n_pages: usize) -> RuntimeResult<()> {
            let (addr, pages) = self
                .mappings
                .remove(&handle)
                .ok_or(ErrorKind::NotFound)?;
            if addr != vaddr || pages != n_pages {
                return Err(ErrorKind::InvalidArgument.into());
            }
            let ret = unsafe { libc::munmap(addr as *mut libc::c_void, pages * PAGE_SIZE) };
            if ret != 0 {
                return Err(ErrorKind::Io.into());
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn map_then_munmap_roundtrip() {
            let mut gnttab = MockGrantTable::default();
            let (addr, handle) = gnttab.map_domain_grant_refs(7, &[1, 2, 3], true).unwrap();
            assert_ne!(addr, 0);
            gnttab.munmap(handle, addr, 3).unwrap();
        }

        #[test]
        fn unbind_unknown_port_is_not_found() {
            let mut evtchn = MockEventChannel::default();
            let err = evtchn.unbind(99).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        #[test]
        fn bind_then_unbind_roundtrip() {
            let mut evtchn = MockEventChannel::default();
            let local = evtchn.bind_interdomain(7, 32).unwrap();
            evtchn.unbind(local).unwrap();
        }
    }
}

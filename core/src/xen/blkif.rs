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

//! The blkif attachment object: `connect`/`disconnect`/`destroy`.

use super::registry::XenContextRegistry;
use super::stats;
use super::xenctrl::{EventChannel, GrantTable};
use crate::config::BlkifSettings;
use crate::error::{Error, ErrorKind, RuntimeResult};
use std::collections::HashMap;

/// Descriptor-slots-per-page differs across the three ring ABIs; this is
/// enough to derive a plausible, power-of-two `nr_ents` for each without
/// pulling in the real Xen ring headers.
const SLOTS_PER_PAGE_NATIVE: u32 = 32;
const SLOTS_PER_PAGE_X86_32: u32 = 32;
const SLOTS_PER_PAGE_X86_64: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlkifId {
    pub domid: u32,
    pub devid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlkifProtocol {
    Native,
    X86_32,
    X86_64,
}

impl BlkifProtocol {
    pub const fn from_wire(v: u8) -> RuntimeResult<Self> {
        Ok(match v {
            0 => Self::Native,
            1 => Self::X86_32,
            2 => Self::X86_64,
            _ => return Err(Error::new(ErrorKind::Unsupported)),
        })
    }

    const fn slots_per_page(self) -> u32 {
        match self {
            Self::Native => SLOTS_PER_PAGE_NATIVE,
            Self::X86_32 => SLOTS_PER_PAGE_X86_32,
            Self::X86_64 => SLOTS_PER_PAGE_X86_64,
        }
    }
}

/// Producer/consumer state shared by all three ring ABIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingIndices {
    pub nr_ents: u32,
    pub req_prod: u32,
    pub req_cons: i32,
    pub req_event: u32,
    pub rsp_prod: u32,
    pub rsp_pvt: i32,
    pub rsp_event: u32,
}

/// A tagged ring view: the protocol decides descriptor layout, but index
/// arithmetic is uniform across all three.
#[derive(Debug, Clone, Copy)]
pub enum RingView {
    Native(RingIndices),
    X86_32(RingIndices),
    X86_64(RingIndices),
}

impl RingView {
    fn new(proto: BlkifProtocol, order: u32) -> Self {
        let nr_ents = (1u32 << order) * proto.slots_per_page();
        let indices = RingIndices {
            nr_ents,
            ..Default::default()
        };
        match proto {
            BlkifProtocol::Native => Self::Native(indices),
            BlkifProtocol::X86_32 => Self::X86_32(indices),
            BlkifProtocol::X86_64 => Self::X86_64(indices),
        }
    }

    pub fn indices(&self) -> &RingIndices {
        match self {
            Self::Native(r) | Self::X86_32(r) | Self::X86_64(r) => r,
        }
    }

    pub fn indices_mut(&mut self) -> &mut RingIndices {
        match self {
            Self::Native(r) | Self::X86_32(r) | Self::X86_64(r) => r,
        }
    }

    pub fn protocol(&self) -> BlkifProtocol {
        match self {
            Self::Native(_) => BlkifProtocol::Native,
            Self::X86_32(_) => BlkifProtocol::X86_32,
            Self::X86_64(_) => BlkifProtocol::X86_64,
        }
    }

    /// Mask a raw ring index into `[0, nr_ents)`. `nr_ents` is always a
    /// power of two.
    pub fn mask(&self, idx: u32) -> u32 {
        idx & (self.indices().nr_ents - 1)
    }
}

/// The tapdisk-side representation of a guest disk. Refers to its attached
/// blkif by identity, never by pointer.
#[derive(Debug, Default)]
pub struct Vbd {
    pub attached: Option<BlkifId>,
    pub paused: bool,
}

pub struct Blkif {
    pub id: BlkifId,
    pub pool: String,
    grefs: Vec<u32>,
    order: u32,
    port: Option<u32>,
    mapping: Option<(usize, u64)>,
    pub ring: Option<RingView>,
    pub n_reqs_free: u32,
    pub ring_size: u32,
    stats_ready: bool,
    pub(super) last_refresh: Option<std::time::Instant>,
}

impl Blkif {
    fn new(id: BlkifId, pool: &str, grefs: &[u32], order: u32) -> Self {
        Self {
            id,
            pool: pool.to_owned(),
            grefs: grefs.to_vec(),
            order,
            port: None,
            mapping: None,
            ring: None,
            n_reqs_free: 0,
            ring_size: 0,
            stats_ready: false,
            last_refresh: None,
        }
    }

    pub fn requests_outstanding(&self) -> bool {
        self.n_reqs_free < self.ring_size
    }
}

#[derive(Default)]
pub struct Blkifs {
    table: HashMap<BlkifId, Blkif>,
}

impl Blkifs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, domid: u32, devid: u32) -> Option<&Blkif> {
        self.table.get(&BlkifId { domid, devid })
    }

    pub fn find_mut(&mut self, domid: u32, devid: u32) -> Option<&mut Blkif> {
        self.table.get_mut(&BlkifId { domid, devid })
    }
}

/// Attach a new blkif. `proto_code` is the raw wire protocol byte; an
/// unrecognized value surfaces as [`ErrorKind::Unsupported`].
#[allow(clippy::too_many_arguments)]
pub fn connect<E: EventChannel, G: GrantTable>(
    registry: &mut XenContextRegistry<E, G>,
    blkifs: &mut Blkifs,
    make_evtchn: impl FnOnce() -> E,
    make_gnttab: impl FnOnce() -> G,
    domid: u32,
    devid: u32,
    grefs: &[u32],
    order: u32,
    port: u32,
    proto_code: u8,
    pool: &str,
    vbd: &mut Vbd,
    settings: &BlkifSettings,
) -> RuntimeResult<BlkifId> {
    let id = BlkifId { domid, devid };
    if blkifs.find(domid, devid).is_some() {
        return Err(Error::with_context(ErrorKind::InvalidArgument, "blkif already attached"));
    }
    if (1usize << order) > settings.max_ring_pages {
        return Err(Error::new(ErrorKind::InvalidArgument));
    }
    let proto = BlkifProtocol::from_wire(proto_code)?;

    let ctx = registry.ctx_get(pool, || (make_evtchn(), make_gnttab()));
    let mut blkif = Blkif::new(id, pool, grefs, order);

    let result: RuntimeResult<()> = (|| {
        let (vaddr, handle) = ctx.gnttab.map_domain_grant_refs(domid, grefs, true)?;
        blkif.mapping = Some((vaddr, handle));

        let ring = RingView::new(proto, order);
        blkif.ring_size = ring.indices().nr_ents;
        blkif.ring = Some(ring);

        let local_port = ctx.evtchn.bind_interdomain(domid, port)?;
        blkif.port = Some(local_port);

        blkif.n_reqs_free = blkif.ring_size;

        stats::init(domid, devid)?;
        blkif.stats_ready = true;

        Ok(())
    })();

    if let Err(e) = result {
        destroy(blkif, registry, pool);
        return Err(e);
    }

    let ctx = registry.get(pool).expect("context just acquired");
    ctx.blkifs.push(id);
    vbd.attached = Some(id);
    blkifs.table.insert(id, blkif);
    Ok(id)
}

/// Detach `(domid, devid)`. Rejects while requests are outstanding: `Busy`
/// if the VBD is still running, `Shutdown` if it has been paused.
pub fn disconnect<E: EventChannel, G: GrantTable>(
    registry: &mut XenContextRegistry<E, G>,
    blkifs: &mut Blkifs,
    vbd: &Vbd,
    domid: u32,
    devid: u32,
) -> RuntimeResult<()> {
    let blkif = blkifs
        .find(domid, devid)
        .ok_or_else(|| Error::new(ErrorKind::NotFound))?;

    if blkif.requests_outstanding() {
        return Err(Error::new(if vbd.paused {
            ErrorKind::Shutdown
        } else {
            ErrorKind::Busy
        }));
    }

    let blkif = blkifs.table.remove(&BlkifId { domid, devid }).unwrap();
    let pool = blkif.pool.clone();
    destroy(blkif, registry, &pool);
    Ok(())
}

/// The context-level event-loop identifier that fires on ring activity for
/// `blkif`.
pub fn event_id<E: EventChannel, G: GrantTable>(
    registry: &XenContextRegistry<E, G>,
    blkif: &Blkif,
) -> Option<u64> {
    registry.get_ref(&blkif.pool).map(|ctx| ctx.ring_event_id)
}

/// Tear down a (possibly partially initialized) blkif. Every step is best
/// effort: failures are logged, never propagated, so the object is always
/// freed.
fn destroy<E: EventChannel, G: GrantTable>(
    mut blkif: Blkif,
    registry: &mut XenContextRegistry<E, G>,
    pool: &str,
) {
    blkif.n_reqs_free = 0;

    if let Some(ctx) = registry.get(pool) {
        if let Some(port) = blkif.port.take() {
            if let Err(e) = ctx.evtchn.unbind(port) {
                log::warn!("failed to unbind event channel for {:?}: {e}", blkif.id);
            }
        }
        if let Some((vaddr, handle)) = blkif.mapping.take() {
            let n_pages = 1usize << blkif.order;
            if let Err(e) = ctx.gnttab.munmap(handle, vaddr, n_pages) {
                log::warn!("failed to unmap grant refs for {:?}: {e}", blkif.id);
            }
        }
        ctx.blkifs.retain(|&id| id != blkif.id);
    }
    registry.ctx_put(pool);

    if blkif.stats_ready {
        if let Err(e) = stats::remove(blkif.id.domid, blkif.id.devid) {
            log::warn!("failed to remove stats file for {:?}: {e}", blkif.id);
        }
    }
}

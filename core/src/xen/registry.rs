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

//! The Xen context registry: a pool-keyed, caller-owned collection rather
//! than a process-wide singleton reached through raw back-pointers from
//! every blkif. Tests get a fresh registry per case instead of sharing
//! global state, and a blkif only ever carries its pool name back to its
//! context, never a pointer.

use std::collections::HashMap;

/// One pool's worth of Xen resources: an event-channel handle, a grant-table
/// handle, and the identities of the blkifs currently attached through it.
pub struct XenContext<E, G> {
    pub evtchn: E,
    pub gnttab: G,
    pub blkifs: Vec<BlkifId>,
    /// The event-loop identifier fired on ring activity for any attached
    /// blkif (`event_id`). Assigned once, at context creation.
    pub ring_event_id: u64,
    refcount: usize,
}

impl<E, G> XenContext<E, G> {
    fn new(evtchn: E, gnttab: G, ring_event_id: u64) -> Self {
        Self {
            evtchn,
            gnttab,
            blkifs: Vec::new(),
            ring_event_id,
            refcount: 0,
        }
    }
}

use super::blkif::BlkifId;

/// Process-wide (or, here, caller-owned) collection of [`XenContext`]s keyed
/// by pool name.
pub struct XenContextRegistry<E, G> {
    pools: HashMap<String, XenContext<E, G>>,
    next_event_id: u64,
}

impl<E, G> Default for XenContextRegistry<E, G> {
    fn default() -> Self {
        Self {
            pools: HashMap::new(),
            next_event_id: 0,
        }
    }
}

impl<E, G> XenContextRegistry<E, G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the context for `pool`, creating it (via `make`) and bumping
    /// its refcount on first use.
    pub fn ctx_get(&mut self, pool: &str, make: impl FnOnce() -> (E, G)) -> &mut XenContext<E, G> {
        if !self.pools.contains_key(pool) {
            let (evtchn, gnttab) = make();
            let id = self.next_event_id;
            self.next_event_id += 1;
            self.pools.insert(pool.to_owned(), XenContext::new(evtchn, gnttab, id));
        }
        let ctx = self.pools.get_mut(pool).unwrap();
        ctx.refcount += 1;
        ctx
    }

    pub fn get(&mut self, pool: &str) -> Option<&mut XenContext<E, G>> {
        self.pools.get_mut(pool)
    }

    pub fn get_ref(&self, pool: &str) -> Option<&XenContext<E, G>> {
        self.pools.get(pool)
    }

    /// Drop a reference to `pool`'s context, tearing it down once no blkif
    /// holds it anymore.
    pub fn ctx_put(&mut self, pool: &str) {
        if let Some(ctx) = self.pools.get_mut(pool) {
            ctx.refcount = ctx.refcount.saturating_sub(1);
            if ctx.refcount == 0 && ctx.blkifs.is_empty() {
                self.pools.remove(pool);
            }
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctx_get_creates_once_and_reuses() {
        let mut reg: XenContextRegistry<u32, u32> = XenContextRegistry::new();
        let id_a = reg.ctx_get("pool-a", || (1, 2)).ring_event_id;
        let id_b = reg.ctx_get("pool-a", || (3, 4)).ring_event_id;
        assert_eq!(id_a, id_b);
        assert_eq!(reg.pool_count(), 1);
    }

    #[test]
    fn ctx_put_tears_down_at_zero_refs_with_no_blkifs() {
        let mut reg: XenContextRegistry<u32, u32> = XenContextRegistry::new();
        reg.ctx_get("pool-a", || (1, 2));
        reg.ctx_put("pool-a");
        assert_eq!(reg.pool_count(), 0);
    }

    #[test]
    fn ctx_put_keeps_context_alive_while_blkifs_remain() {
        let mut reg: XenContextRegistry<u32, u32> = XenContextRegistry::new();
        reg.ctx_get("pool-a", || (1, 2))
            .blkifs
            .push(BlkifId { domid: 7, devid: 768 });
        reg.ctx_put("pool-a");
        assert_eq!(reg.pool_count(), 1);
    }
}

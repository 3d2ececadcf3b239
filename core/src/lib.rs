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

//! `tapdisk-core`: the VHD undo-journal engine and the Xen blkif attachment
//! core for a tapdisk virtual-disk service.
//!
//! This crate owns two things that a host process (a tapdisk-style disk
//! server) wires together: a crash-consistent undo journal over a VHD file
//! ([`journal`], built on [`vhd`] and [`codec`]), and an attachment core for
//! Xen block-interface devices ([`xen`]). Neither side depends on the other;
//! the host is the one that journals a write and then pushes it through a
//! ring.

pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod journal;
pub mod vhd;
pub mod xen;

pub use config::Configuration;
pub use error::{Error, ErrorKind, RuntimeResult};
pub use journal::{BlockJournalMode, Journal};

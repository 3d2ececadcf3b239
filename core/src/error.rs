/*
 * Created on Sat Feb 04 2023
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
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

//! Error kinds surfaced by the journal engine and the blkif attachment core.

use core::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// malformed journal entry, unknown protocol, out-of-range block, duplicate attach
    InvalidArgument,
    /// disconnect of an unattached (domid, devid)
    NotFound,
    /// requests outstanding
    Busy,
    /// requests outstanding while the VBD is paused
    Shutdown,
    /// any syscall or atomic-io shortfall, including short reads/writes
    Io,
    /// cookie mismatch, checksum mismatch, misaligned entry size
    Corrupt,
    /// protocol not one of {native, x86_32, x86_64}
    Unsupported,
    /// journal sidecar already present at create time
    AlreadyExists,
}

impl ErrorKind {
    /// The `-errno` this kind maps to at the exposed blkif/journal boundary.
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => libc::EINVAL,
            Self::NotFound => libc::ENODEV,
            Self::Busy => libc::EBUSY,
            Self::Shutdown => libc::ESHUTDOWN,
            Self::Io => libc::EIO,
            Self::Corrupt => libc::EINVAL,
            Self::Unsupported => libc::EPROTONOSUPPORT,
            Self::AlreadyExists => libc::EEXIST,
        }
    }
}

#[derive(Debug)]
/// An error with the context of where it happened, preserved for logs without
/// forcing every call site to format a message by hand.
pub struct Error {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl Error {
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }
    pub const fn with_context(kind: ErrorKind, context: &'static str) -> Self {
        Self {
            kind,
            context: Some(context),
        }
    }
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
    /// `-errno` for the exposed C-compatible surface: journal/blkif calls
    /// return negative numeric codes, not a truthy/falsy result.
    pub const fn negative_errno(&self) -> i32 {
        -self.kind.errno()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            Some(ctx) => write!(f, "{:?}: {}", self.kind, ctx),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Self::new(ErrorKind::Io)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

pub type RuntimeResult<T> = Result<T, Error>;

/// Attach static context to a [`RuntimeResult`] without changing its kind.
pub trait ErrorContext<T> {
    fn ctx(self, context: &'static str) -> RuntimeResult<T>;
}

impl<T> ErrorContext<T> for RuntimeResult<T> {
    fn ctx(self, context: &'static str) -> RuntimeResult<T> {
        self.map_err(|e| Error::with_context(e.kind, context))
    }
}

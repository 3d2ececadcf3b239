/*
 * Created on Tue Aug 18 2020
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2020, Sayan Nandan <ohsayan@outlook.com>
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

//! Colored diagnostics for the host process that embeds the tapdisk core.
//!
//! Journal recovery and blkif teardown paths log through the `log` crate; this module is
//! for the handful of places a host binary wants a plain colored line on stderr without
//! pulling in a full logger (e.g. the `POISON` warning printed once at startup).

use std::fmt;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn write_with_col<T: fmt::Display>(item: T, color: Option<Color>) -> fmt::Result {
    let mut stdout = StandardStream::stdout(ColorChoice::Always);
    if stdout.set_color(ColorSpec::new().set_fg(color)).is_err() {
        return Err(fmt::Error);
    }
    if writeln!(&mut stdout, "{}", item).is_err() {
        return Err(fmt::Error);
    }
    stdout.reset().map_err(|_| fmt::Error)
}

pub fn info<T: fmt::Display>(item: T) -> fmt::Result {
    write_with_col(item, Some(Color::Cyan))
}

pub fn warn<T: fmt::Display>(item: T) -> fmt::Result {
    write_with_col(item, Some(Color::Yellow))
}

pub fn error<T: fmt::Display>(item: T) -> fmt::Result {
    write_with_col(item, Some(Color::Red))
}

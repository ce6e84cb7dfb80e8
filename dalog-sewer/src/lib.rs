// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of dalog.
//
// dalog is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! The "log sewer": everything many scattered boxes dribble out over TCP, collected into one
//! file on a machine you can actually get a shell on.
//!
//! The binary in this crate is the receiving end of [dalog]'s network sink. The actual
//! server lives in [`server`] so integration tests can drive it on an ephemeral port.
//!
//! [dalog]: https://docs.rs/dalog

pub mod server;

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

//! [dalog](crate) errors

use backtrace::Backtrace;

/// [dalog](crate) error type
///
/// [dalog](crate) eschews libraries like [thiserror], [anyhow] & [Snafu] in favor of a
/// straightforward enumeration with a few match arms chosen on the basis of what the caller will
/// need to respond.
///
/// [thiserror]: https://docs.rs/thiserror
/// [anyhow]: https://docs.rs/anyhow
/// [Snafu]: https://docs.rs/snafu/latest/snafu
#[non_exhaustive]
pub enum Error {
    /// Rule text carried no usable `mask=` clause, or the mask value contained a toggle
    /// character outside the documented alphabet
    BadRuleMask {
        rule: String,
        offending: Option<char>,
        back: Backtrace,
    },
    /// Rule text carried a `line=` clause that didn't parse as a line number
    BadRuleLine {
        rule: String,
        value: String,
        back: Backtrace,
    },
    /// Rule index out of range
    NoSuchRule {
        index: usize,
        count: usize,
        back: Backtrace,
    },
    /// The record buffer could not grow to hold a formatted record; the record is dropped,
    /// the process carries on
    OutOfMemory {
        source: std::collections::TryReserveError,
        back: Backtrace,
    },
    /// I/O error in a local sink (file, syslog socket, stdout)
    Sink {
        source: std::io::Error,
        back: Backtrace,
    },
    /// General transport layer error (network sink)
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Sink {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadRuleMask {
                rule,
                offending: Some(c),
                ..
            } => {
                write!(f, "Rule {:?} has an unrecognized mask toggle {:?}", rule, c)
            }
            Error::BadRuleMask { rule, .. } => {
                write!(f, "Rule {:?} has no mask= clause", rule)
            }
            Error::BadRuleLine { rule, value, .. } => {
                write!(f, "Rule {:?}: {:?} is not a line number", rule, value)
            }
            Error::NoSuchRule { index, count, .. } => {
                write!(f, "No rule at index {} (store holds {})", index, count)
            }
            Error::OutOfMemory { source, .. } => {
                write!(f, "While growing a record buffer, got {}", source)
            }
            Error::Sink { source, .. } => write!(f, "Sink I/O error: {}", source),
            Error::Transport { source, .. } => write!(f, "Transport error: {:?}", source),
            _ => write!(f, "Other dalog error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadRuleMask { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::BadRuleLine { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::NoSuchRule { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::OutOfMemory { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Sink { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Transport { back, .. } => write!(f, "{}\n{:#?}", self, back),
            err => write!(f, "dalog error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

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

//! Severity & modifier bit definitions.
//!
//! A [`Mask`] is the per-call-site switchboard: the low byte enables severities (one bit per
//! [`Severity`], numbered as in `<syslog.h>`), the high bits enable "modifier" prefix tokens
//! (timestamps, pid/tid, the various name fields). Operators express masks as compact toggle
//! strings (`"ew-d"`, `"ALL"`, …); [`parse_toggles`] turns those into a `(set, clear)` pair.
//!
//! Historical variants of this library disagreed on a couple of toggle letters (`l` vs `i` for
//! "info", `t` vs `d` for "debug"). Both spellings are accepted here; the severity itself is
//! canonical.

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           struct Mask                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A bitset enabling severities & output modifiers for one call site.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Mask(pub(crate) u32);

impl Mask {
    /// No bits set; the base of every rule evaluation.
    pub const EMPTY: Mask = Mask(0);

    /// f: system is unusable
    pub const FATAL: Mask = Mask(0x0000_0001);
    /// a: action must be taken immediately
    pub const ALERT: Mask = Mask(0x0000_0002);
    /// c: critical conditions
    pub const CRIT: Mask = Mask(0x0000_0004);
    /// e: error conditions
    pub const ERR: Mask = Mask(0x0000_0008);
    /// w: warning conditions
    pub const WARNING: Mask = Mask(0x0000_0010);
    /// n: normal but significant condition
    pub const NOTICE: Mask = Mask(0x0000_0020);
    /// i, l: informational
    pub const INFO: Mask = Mask(0x0000_0040);
    /// d, t: debug-level messages
    pub const DEBUG: Mask = Mask(0x0000_0080);
    /// All eight severities; what the `ALL` shorthand expands to
    pub const SEVERITIES: Mask = Mask(0x0000_00ff);

    /// s: relative time, in ms
    pub const RTM: Mask = Mask(0x0000_0100);
    /// S: absolute time, in ms
    pub const ATM: Mask = Mask(0x0000_0200);

    /// j: process id
    pub const PID: Mask = Mask(0x0000_1000);
    /// x: thread id
    pub const TID: Mask = Mask(0x0000_2000);

    /// P: program name
    pub const PROG: Mask = Mask(0x0001_0000);
    /// M: module name
    pub const MODU: Mask = Mask(0x0002_0000);
    /// F: file name
    pub const FILE: Mask = Mask(0x0004_0000);
    /// H: function name
    pub const FUNC: Mask = Mask(0x0008_0000);
    /// N: line number
    pub const LINE: Mask = Mask(0x0010_0000);

    /// Every defined bit
    pub const ALL: Mask = Mask(0xffff_ffff);

    /// The out-of-the-box default: notice & above, stamped with absolute time and the
    /// prog/modu/file/line of the call site.
    pub const DEFAULT: Mask = Mask(
        Mask::FATAL.0
            | Mask::ALERT.0
            | Mask::CRIT.0
            | Mask::ERR.0
            | Mask::WARNING.0
            | Mask::NOTICE.0
            | Mask::ATM.0
            | Mask::PROG.0
            | Mask::MODU.0
            | Mask::FILE.0
            | Mask::LINE.0,
    );

    /// True iff every bit of `other` is set in `self`.
    pub fn contains(self, other: Mask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Turn the bits of `other` on.
    pub fn set(&mut self, other: Mask) {
        self.0 |= other.0;
    }

    /// Turn the bits of `other` off.
    pub fn clear(&mut self, other: Mask) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Mask {
    type Output = Mask;
    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          enum Severity                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The eight record severities, numbered as in `<syslog.h>` (and so as in the low byte of
/// [`Mask`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    /// system is unusable
    Fatal,
    /// action must be taken immediately
    Alert,
    /// critical conditions
    Critical,
    /// error conditions
    Error,
    /// warning conditions
    Warning,
    /// normal, but significant condition
    Notice,
    /// informational message
    Info,
    /// debug-level message
    Debug,
}

impl Severity {
    /// The [`Mask`] bit gating this severity.
    pub fn bit(self) -> Mask {
        match self {
            Severity::Fatal => Mask::FATAL,
            Severity::Alert => Mask::ALERT,
            Severity::Critical => Mask::CRIT,
            Severity::Error => Mask::ERR,
            Severity::Warning => Mask::WARNING,
            Severity::Notice => Mask::NOTICE,
            Severity::Info => Mask::INFO,
            Severity::Debug => Mask::DEBUG,
        }
    }

    /// The one-character indicator rendered as the leading `|X|` token of a record.
    pub fn indicator(self) -> char {
        match self {
            Severity::Fatal => 'F',
            Severity::Alert => 'A',
            Severity::Critical => 'C',
            Severity::Error => 'E',
            Severity::Warning => 'W',
            Severity::Notice => 'N',
            Severity::Info => 'I',
            Severity::Debug => 'D',
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Severity::Fatal => "fatal",
                Severity::Alert => "alert",
                Severity::Critical => "critical",
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Notice => "notice",
                Severity::Info => "info",
                Severity::Debug => "debug",
            }
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         toggle parsing                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Map one toggle character to its bit. Digits `0`-`7` are historical aliases for the eight
/// severities in `<syslog.h>` order.
fn toggle_bit(c: char) -> Option<Mask> {
    match c {
        '0' | 'f' => Some(Mask::FATAL),
        '1' | 'a' => Some(Mask::ALERT),
        '2' | 'c' => Some(Mask::CRIT),
        '3' | 'e' => Some(Mask::ERR),
        '4' | 'w' => Some(Mask::WARNING),
        '5' | 'n' => Some(Mask::NOTICE),
        '6' | 'i' | 'l' => Some(Mask::INFO),
        '7' | 'd' | 't' => Some(Mask::DEBUG),
        's' => Some(Mask::RTM),
        'S' => Some(Mask::ATM),
        'j' => Some(Mask::PID),
        'x' => Some(Mask::TID),
        'P' => Some(Mask::PROG),
        'M' => Some(Mask::MODU),
        'F' => Some(Mask::FILE),
        'H' => Some(Mask::FUNC),
        'N' => Some(Mask::LINE),
        _ => None,
    }
}

/// Parse a toggle string (the value of a rule's `mask=` clause) into a `(set, clear)` pair.
///
/// Each character toggles one bit on; a `-` prefix toggles the following token off instead. The
/// word `ALL` stands for all eight severities, so `"ALL-d"` enables everything but debug. On an
/// unrecognized character (or a trailing `-`) the whole string is rejected and the offending
/// character returned -- unlike the C library this grew out of, which silently ignored junk.
pub fn parse_toggles(text: &str) -> StdResult<(Mask, Mask), char> {
    let mut set = Mask::EMPTY;
    let mut clr = Mask::EMPTY;

    let mut rest = text;
    let mut clearing = false;
    while let Some(c) = rest.chars().next() {
        if !clearing && c == '-' {
            clearing = true;
            rest = &rest[1..];
            continue;
        }
        let (bit, used) = if rest.starts_with("ALL") {
            (Mask::SEVERITIES, 3)
        } else {
            (toggle_bit(c).ok_or(c)?, c.len_utf8())
        };
        if clearing {
            clr.set(bit);
        } else {
            set.set(bit);
        }
        clearing = false;
        rest = &rest[used..];
    }
    if clearing {
        // Trailing '-' with nothing to clear
        return Err('-');
    }

    Ok((set, clr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bits() {
        assert_eq!(Severity::Fatal.bit(), Mask::FATAL);
        assert_eq!(Severity::Debug.bit(), Mask::DEBUG);
        assert!(Mask::SEVERITIES.contains(Severity::Notice.bit()));
        assert!(!Mask::DEFAULT.contains(Mask::DEBUG));
        assert_eq!(format!("{}", Severity::Warning), "warning");
    }

    #[test]
    fn test_parse_toggles() {
        let (set, clr) = parse_toggles("ew").unwrap();
        assert_eq!(set, Mask::ERR | Mask::WARNING);
        assert_eq!(clr, Mask::EMPTY);

        let (set, clr) = parse_toggles("facewnid").unwrap();
        assert_eq!(set, Mask::SEVERITIES);
        assert_eq!(clr, Mask::EMPTY);

        // digit & letter aliases land on the same bits
        assert_eq!(parse_toggles("04").unwrap(), parse_toggles("fw").unwrap());
        assert_eq!(parse_toggles("l").unwrap(), parse_toggles("i").unwrap());
        assert_eq!(parse_toggles("t").unwrap(), parse_toggles("d").unwrap());

        let (set, clr) = parse_toggles("e-w").unwrap();
        assert_eq!(set, Mask::ERR);
        assert_eq!(clr, Mask::WARNING);

        let (set, clr) = parse_toggles("SPMFN").unwrap();
        assert_eq!(
            set,
            Mask::ATM | Mask::PROG | Mask::MODU | Mask::FILE | Mask::LINE
        );
        assert_eq!(clr, Mask::EMPTY);
    }

    #[test]
    fn test_parse_all_shorthand() {
        let (set, clr) = parse_toggles("ALL").unwrap();
        assert_eq!(set, Mask::SEVERITIES);
        assert_eq!(clr, Mask::EMPTY);

        let (set, clr) = parse_toggles("-ALL").unwrap();
        assert_eq!(set, Mask::EMPTY);
        assert_eq!(clr, Mask::SEVERITIES);

        let (set, clr) = parse_toggles("ALL-d").unwrap();
        assert_eq!(set, Mask::SEVERITIES);
        assert_eq!(clr, Mask::DEBUG);
    }

    #[test]
    fn test_parse_rejects_junk() {
        assert_eq!(parse_toggles("ez"), Err('z'));
        assert_eq!(parse_toggles("-"), Err('-'));
        assert_eq!(parse_toggles("e-"), Err('-'));
        assert_eq!(parse_toggles("8"), Err('8'));
    }
}

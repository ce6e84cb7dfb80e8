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

//! Runtime rule-filtered logging for debugging fleets of embedded Linux boxes.
//!
//! # Introduction
//!
//! dalog grew out of an ad-hoc C library used to chase bugs on set-top boxes in the field: a
//! logging front-end whose verbosity is steered *per call site* by operator-supplied filter
//! rules, fanned out to any combination of stdout, a local file, syslog and a TCP collection
//! server (the "log sewer", see the companion `dalog-sewer` crate).
//!
//! A rule is a line of text:
//!
//! ```text
//! file=net.c,mask=ew      # error & warning on, for call sites in net.c
//! func=drain,mask=-ALL    # silence one chatty function entirely
//! mask=SPF                # stamp every record with time, program & file
//! ```
//!
//! Each matching rule toggles bits in the call site's [`Mask`]; rules are applied in the order
//! they were added, so the latest rule wins for the bits it touches. Rules can arrive from
//! config files, the environment, or at runtime -- the store's version counter invalidates the
//! per-call-site mask cache, so a freshly added rule takes effect on the very next log call
//! without restarting anything.
//!
//! # Usage
//!
//! The severity macros log through a process-wide [`Logger`] configured from the environment
//! (`DALOG_TO_LOCAL`, `DALOG_TO_NETWORK`, `DALOG_DFCFG`, ... -- see [`Logger::from_env`]) on
//! first use:
//!
//! ```
//! use dalog::{dalog_error, dalog_info};
//!
//! dalog_info!("pump primed after {} attempts", 3);
//! dalog_error!("lost contact with the mothership");
//! ```
//!
//! Nothing requires the global, though; every piece (rule store, resolver, sinks, front-end)
//! is an ordinary value that can be built & wired up by hand:
//!
//! ```
//! use dalog::{Logger, Mask};
//!
//! let logger = Logger::new();
//! logger.set_default_mask(Mask::DEFAULT);
//! logger.rules().add("modu=payments,mask=d").unwrap();
//! ```

pub mod callsite;
pub mod error;
pub mod frontend;
pub mod mask;
pub mod rule;
pub mod sink;

pub use callsite::{CallSite, MaskResolver};
pub use error::{Error, Result};
pub use frontend::Logger;
pub use mask::{Mask, Severity};
pub use rule::{Rule, RuleId, RuleStore};

use std::sync::OnceLock;

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// The process-wide [`Logger`] driven by the severity macros. Built with
/// [`Logger::from_env`] on first use unless [`init`] got there first.
pub fn global() -> &'static Logger {
    GLOBAL.get_or_init(Logger::from_env)
}

/// Install `logger` as the process-wide instance. Must be called before the first use of
/// [`global`] (i.e. before the first macro invocation); returns the logger back otherwise.
pub fn init(logger: Logger) -> std::result::Result<(), Logger> {
    GLOBAL.set(logger)
}

/// The name of the enclosing function, e.g. `server::drain`.
///
/// Rust has no `__func__`; this is the usual workaround -- `std::any::type_name` of a local
/// item includes the function's path, which we trim back down.
#[macro_export]
macro_rules! dalog_func_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // trim the trailing "::f"
        &name[..name.len() - 3]
    }};
}

/// Log at an explicit [`Severity`](crate::Severity) through the [`global`](crate::global)
/// logger. The severity macros below are the intended surface; this is their common plumbing.
#[macro_export]
macro_rules! dalog {
    ($sev:expr, $($arg:tt)*) => {{
        let site = $crate::CallSite {
            modu: module_path!(),
            file: file!(),
            func: $crate::dalog_func_name!(),
            line: line!(),
        };
        // fire-and-forget: a dropped record must never unwind into the caller
        let _ = $crate::global().log($sev, &site, format_args!($($arg)*));
    }};
}

/// system is unusable
#[macro_export]
macro_rules! dalog_fatal {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Fatal, $($arg)*) };
}

/// action must be taken immediately
#[macro_export]
macro_rules! dalog_alert {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Alert, $($arg)*) };
}

/// critical conditions
#[macro_export]
macro_rules! dalog_critical {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Critical, $($arg)*) };
}

/// error conditions
#[macro_export]
macro_rules! dalog_error {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Error, $($arg)*) };
}

/// warning conditions
#[macro_export]
macro_rules! dalog_warning {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Warning, $($arg)*) };
}

/// normal, but significant condition
#[macro_export]
macro_rules! dalog_notice {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Notice, $($arg)*) };
}

/// informational message
#[macro_export]
macro_rules! dalog_info {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Info, $($arg)*) };
}

/// debug-level message
#[macro_export]
macro_rules! dalog_debug {
    ($($arg:tt)*) => { $crate::dalog!($crate::Severity::Debug, $($arg)*) };
}

/// Push already-formatted bytes straight to the sinks: no call-site context, no mask check,
/// no formatting.
#[macro_export]
macro_rules! dalog_raw {
    ($content:expr) => {
        $crate::global().log_raw(::std::convert::AsRef::<[u8]>::as_ref($content))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_func_name() {
        let name = dalog_func_name!();
        assert!(name.ends_with("tests::test_func_name"), "got {:?}", name);
    }

    // The macros share the one process-wide logger, so they're exercised in a single test.
    #[test]
    fn test_macros_drive_the_global_logger() {
        use crate::sink::Sink;
        use std::sync::{Arc, Mutex};

        struct CaptureSink {
            buf: Arc<Mutex<Vec<u8>>>,
        }
        impl Sink for CaptureSink {
            fn emit(&self, content: &[u8]) -> Result<()> {
                self.buf.lock().unwrap().extend_from_slice(content);
                Ok(())
            }
        }

        let buf = Arc::new(Mutex::new(Vec::new()));
        let logger = Logger::new();
        logger.register_sink(Box::new(CaptureSink { buf: buf.clone() }));
        logger.rules().add("mask=ie").unwrap();
        // If another test got to the global first this returns Err; in that case we can't
        // assert anything meaningful, so just bail.
        if init(logger).is_err() {
            return;
        }

        dalog_info!("count={}", 2);
        dalog_debug!("below the mask");
        dalog_error!("kaboom");
        dalog_raw!(b"raw bytes");

        let got = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(got.contains("|I| count=2"));
        assert!(got.contains("|E| kaboom"));
        assert!(got.contains("raw bytes"));
        assert!(!got.contains("below the mask"));
    }
}

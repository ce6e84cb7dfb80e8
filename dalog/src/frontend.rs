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

//! The logging front-end.
//!
//! [`Logger`] is the public call surface: it owns the [`RuleStore`], the [`MaskResolver`] and
//! the [`SinkSet`], resolves the mask for each call site, formats the record and fans it out.
//! The severity macros ([`dalog_error!`](crate::dalog_error) & friends) drive the process-wide
//! instance behind [`global()`](crate::global); embedders & tests can build their own.
//!
//! # Record format
//!
//! A record is a run of `|`-delimited prefix tokens selected by the resolved mask's modifier
//! bits, a single space, then the caller's message:
//!
//! ```text
//! |E|S:2014/09/02 20:41:07.523|P:sewer|M:sewer::server|F:server.rs|L:88| accept failed
//! ```
//!
//! The leading `|X|` severity indicator is always present. No trailing newline is appended
//! here; every sink normalizes that for itself (see [`crate::sink`]).

use crate::callsite::{CallSite, MaskResolver};
use crate::error::{Error, Result};
use crate::mask::{Mask, Severity};
use crate::rule::{basename, Rule, RuleStore};
use crate::sink::{FileSink, NetworkSink, Sink, SinkSet, StdoutSink};

use backtrace::Backtrace;

use std::fmt::Write;
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Logger                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The process-level logging context: rule store, mask cache, sink registry & the identity
/// fields (program name, pid) stamped into records.
pub struct Logger {
    prog: String,
    pid: u32,
    epoch: Instant,
    rules: RuleStore,
    resolver: MaskResolver,
    sinks: SinkSet,
}

/// Basename of the current executable, falling back to `PROG-<pid>` when it cannot be read
/// (e.g. a deleted binary on an embedded box).
fn discover_prog_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| format!("PROG-{}", std::process::id()))
}

#[cfg(target_os = "linux")]
fn thread_id() -> u64 {
    // SAFETY: gettid(2) takes no arguments & cannot fail.
    (unsafe { libc::gettid() }) as u64
}

#[cfg(not(target_os = "linux"))]
fn thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new()
    }
}

impl Logger {
    /// A bare logger: no rules, no sinks. Every call resolves to the empty mask until rules
    /// are added, so this is a no-op logger out of the box.
    pub fn new() -> Logger {
        Logger {
            prog: discover_prog_name(),
            pid: std::process::id(),
            epoch: Instant::now(),
            rules: RuleStore::new(),
            resolver: MaskResolver::new(),
            sinks: SinkSet::new(),
        }
    }

    /// A logger configured the way the shipped C library configured itself:
    ///
    /// - the default mask ([`Mask::DEFAULT`]) installed as the first rule,
    /// - rules loaded from `~/.dalog.cfg`, `./.dalog.cfg` & the file named by `DALOG_DFCFG`
    ///   (in that order; missing files are fine),
    /// - a stdout sink if `DALOG_TO_STDOUT` is set,
    /// - a file sink on the path in `DALOG_TO_LOCAL`,
    /// - a syslog sink if `DALOG_TO_SYSLOG` is set (Linux only),
    /// - a network sink targeting the `host:port` in `DALOG_TO_NETWORK` (the connection
    ///   itself is lazy; an unreachable server does not fail setup).
    ///
    /// Absence of every sink variable leaves the fan-out list empty & logging a no-op, which
    /// is the desired state for a production box that hasn't been told to debug anything.
    pub fn from_env() -> Logger {
        let logger = Logger::new();
        logger.set_default_mask(Mask::DEFAULT);

        if let Some(home) = dirs::home_dir() {
            logger.load_rules_file(home.join(".dalog.cfg"));
        }
        logger.load_rules_file(".dalog.cfg");
        if let Some(path) = std::env::var_os("DALOG_DFCFG") {
            logger.load_rules_file(path);
        }

        if std::env::var_os("DALOG_TO_STDOUT").is_some() {
            logger.sinks.register(Box::new(StdoutSink));
        }
        if let Some(path) = std::env::var_os("DALOG_TO_LOCAL") {
            match FileSink::new(&path) {
                Ok(sink) => logger.sinks.register(Box::new(sink)),
                Err(err) => eprintln!("dalog: can't open {:?}: {}", path, err),
            }
        }
        #[cfg(target_os = "linux")]
        if std::env::var_os("DALOG_TO_SYSLOG").is_some() {
            match crate::sink::SyslogSink::new() {
                Ok(sink) => logger.sinks.register(Box::new(sink)),
                Err(err) => eprintln!("dalog: can't reach syslog: {}", err),
            }
        }
        if let Ok(addr) = std::env::var("DALOG_TO_NETWORK") {
            logger.sinks.register(Box::new(NetworkSink::new(addr)));
        }

        logger
    }

    /// The program name stamped into `P:` tokens & matched by `prog=` rule predicates.
    pub fn prog_name(&self) -> &str {
        &self.prog
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Register another output backend. Fan-out is in registration order; duplicates are
    /// delivered twice.
    pub fn register_sink(&self, sink: Box<dyn Sink>) {
        self.sinks.register(sink);
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    /// Install `mask` as an unconditional rule. Appended like any other rule, so an operator
    /// rule added later still overrides it bit-by-bit.
    pub fn set_default_mask(&self, mask: Mask) {
        self.rules.add_rule(Rule::from_mask(mask));
    }

    /// Load rules from a config file: one rule per line, `#` comments & blank lines skipped.
    /// A line that fails to parse is reported on stderr & skipped; the rest of the file still
    /// loads. Returns the number of rules added (zero if the file can't be read -- a missing
    /// config file is the common case, not an error).
    pub fn load_rules_file<P: AsRef<Path>>(&self, path: P) -> usize {
        let file = match std::fs::File::open(path.as_ref()) {
            Ok(file) => file,
            Err(_) => return 0,
        };

        let mut added = 0;
        for line in std::io::BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    eprintln!("dalog: reading {:?}: {}", path.as_ref(), err);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.rules.add(line) {
                Ok(_) => added += 1,
                Err(err) => eprintln!("dalog: {:?}: {}", path.as_ref(), err),
            }
        }
        added
    }

    /// The resolved mask for `site` (cached; see [`MaskResolver`]).
    pub fn mask_for(&self, site: &CallSite) -> Mask {
        self.resolver.mask_for(&self.rules, &self.prog, site)
    }

    /// Would a record of `severity` from `site` go anywhere?
    pub fn enabled(&self, severity: Severity, site: &CallSite) -> bool {
        self.mask_for(site).contains(severity.bit())
    }

    /// Format & emit one record. Returns the number of bytes handed to the sinks; `Ok(0)`
    /// means the call site's mask has the severity switched off (the hot no-op path -- one
    /// cache lookup, no formatting, no allocation).
    pub fn log(&self, severity: Severity, site: &CallSite, args: std::fmt::Arguments) -> Result<usize> {
        let mask = self.mask_for(site);
        if !mask.contains(severity.bit()) {
            return Ok(0);
        }

        let record = self.format_record(severity, mask, site, args)?;
        self.sinks.dispatch(record.as_bytes());
        Ok(record.len())
    }

    /// Feed already-formatted bytes straight to the sinks, bypassing mask resolution &
    /// formatting entirely.
    pub fn log_raw(&self, content: &[u8]) {
        self.sinks.dispatch(content);
    }

    fn format_record(
        &self,
        severity: Severity,
        mask: Mask,
        site: &CallSite,
        args: std::fmt::Arguments,
    ) -> Result<String> {
        let mut buf = String::new();
        // The one allocation whose failure we can surface; per the library's contract an
        // OOM drops this record, not the process. (Growth past the reservation aborts, as
        // any Rust allocation does.)
        buf.try_reserve(256 + args.as_str().map_or(0, str::len))
            .map_err(|err| Error::OutOfMemory {
                source: err,
                back: Backtrace::new(),
            })?;

        buf.push('|');
        buf.push(severity.indicator());
        buf.push('|');

        // write! into a String cannot fail, hence the discarded Results below.
        if mask.contains(Mask::RTM) {
            let _ = write!(buf, "s:{}|", self.epoch.elapsed().as_millis());
        }
        if mask.contains(Mask::ATM) {
            let now = chrono::Local::now();
            let _ = write!(
                buf,
                "S:{}.{:03}|",
                now.format("%Y/%m/%d %H:%M:%S"),
                now.timestamp_subsec_millis()
            );
        }
        if mask.contains(Mask::PID) {
            let _ = write!(buf, "j:{}|", self.pid);
        }
        if mask.contains(Mask::TID) {
            let _ = write!(buf, "x:{:x}|", thread_id());
        }
        if mask.contains(Mask::PROG) {
            let _ = write!(buf, "P:{}|", self.prog);
        }
        if mask.contains(Mask::MODU) {
            let _ = write!(buf, "M:{}|", site.modu);
        }
        if mask.contains(Mask::FILE) {
            let _ = write!(buf, "F:{}|", basename(site.file));
        }
        if mask.contains(Mask::FUNC) {
            let _ = write!(buf, "H:{}|", site.func);
        }
        if mask.contains(Mask::LINE) {
            let _ = write!(buf, "L:{}|", site.line);
        }
        buf.push(' ');

        match args.as_str() {
            Some(msg) => buf.push_str(msg),
            None => {
                let _ = buf.write_fmt(args);
            }
        }

        Ok(buf)
    }
}

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

//! Call-site identity & the per-call-site mask cache.
//!
//! Every place in code that can emit a record is identified by a [`CallSite`]: module, file,
//! function & line (the program name is process-wide, so the [`Logger`](crate::frontend::Logger)
//! carries it rather than every site). Rule evaluation is a linear scan of the store, too
//! expensive for the hot logging path, so [`MaskResolver`] caches the resolved mask per site
//! together with the store version it was computed against. A log call then costs one map
//! lookup & two atomic loads until an operator actually touches the rules.
//!
//! The staleness-check-then-recompute sequence is deliberately racy: two threads may both
//! observe a stale entry and both recompute. [`RuleStore::evaluate`] is a pure function of the
//! store, so they write the same answer; tolerating the duplicate work buys an uncontended
//! fast path.

use crate::mask::Mask;
use crate::rule::RuleStore;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct CallSite                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One place in code that can emit a log record. The severity macros build these from
/// `module_path!()`, `file!()`, `line!()` & the function-name trick in
/// [`dalog_func_name!`](crate::dalog_func_name); nothing stops a caller from building one by
/// hand.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Module path, e.g. `sewer::server`
    pub modu: &'static str,
    /// File name as reported by `file!()`; rules match on its basename
    pub file: &'static str,
    /// Function name
    pub func: &'static str,
    /// Line number
    pub line: u32,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       struct MaskResolver                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// `(last seen version, resolved mask)`, both in atomics so the fresh path never writes the map.
struct CacheEntry {
    version: AtomicU64,
    mask: AtomicU32,
}

impl CacheEntry {
    fn new() -> CacheEntry {
        CacheEntry {
            // 0 predates every store version, so a fresh entry always recomputes
            version: AtomicU64::new(0),
            mask: AtomicU32::new(0),
        }
    }
}

/// Resolves & caches the enabled mask per call site.
pub struct MaskResolver {
    entries: RwLock<HashMap<CallSite, Arc<CacheEntry>>>,
}

impl Default for MaskResolver {
    fn default() -> Self {
        MaskResolver::new()
    }
}

impl MaskResolver {
    pub fn new() -> MaskResolver {
        MaskResolver {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The mask for `site` against the current state of `store`.
    ///
    /// Cache hit (entry present & its version current): two atomic loads under a read lock.
    /// Miss or stale: re-evaluate & refresh the entry. The version is read *before* evaluating;
    /// if a mutation lands in between we may store a newer mask under the older version, which
    /// only means one redundant recompute on the next call -- never a stale answer dressed up
    /// as fresh.
    pub fn mask_for(&self, store: &RuleStore, prog: &str, site: &CallSite) -> Mask {
        let entry = {
            let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            map.get(site).cloned()
        };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
                map.entry(site.clone())
                    .or_insert_with(|| Arc::new(CacheEntry::new()))
                    .clone()
            }
        };

        let current = store.snapshot_version();
        if entry.version.load(Ordering::Acquire) < current {
            let mask = store.evaluate(prog, site);
            entry.mask.store(mask.0, Ordering::Release);
            entry.version.store(current, Ordering::Release);
            mask
        } else {
            Mask(entry.mask.load(Ordering::Acquire))
        }
    }

    /// Number of distinct call sites seen so far.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

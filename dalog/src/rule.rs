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

//! Filter rules & the [`RuleStore`].
//!
//! A [`Rule`] is an operator-supplied filter: an optional exact-match predicate on each of
//! program, module, file, function & line, plus a pair of mask deltas ("turn these bits on,
//! those off"). Rules are kept in insertion order and folded over a call site in that order, so
//! the *last* rule touching a bit wins:
//!
//! ```text
//! file=net.c,mask=ew      # net.c: error & warning on
//! file=net.c,mask=-w      # ...on second thought, warning off again
//! ```
//!
//! The store carries a version counter ("touch counter" in the original C library) bumped on
//! every mutation; [`MaskResolver`](crate::callsite::MaskResolver) uses it to invalidate
//! per-call-site cached masks without ever copying rule data.

use crate::callsite::CallSite;
use crate::error::{Error, Result};
use crate::mask::{parse_toggles, Mask};

use backtrace::Backtrace;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Index of a rule within its store, as returned from [`RuleStore::add`].
pub type RuleId = usize;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           struct Rule                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One filter rule. An unset predicate vacuously matches every call site.
#[derive(Clone, Debug, Default)]
pub struct Rule {
    prog: Option<String>,
    modu: Option<String>,
    file: Option<String>,
    func: Option<String>,
    line: Option<u32>,
    set: Mask,
    clear: Mask,
}

/// Strip any directory components; call sites report `file!()`-style paths while operators
/// write plain basenames.
pub(crate) fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

impl Rule {
    /// Parse compact rule text: comma-separated `key=value` pairs from `prog`, `modu`, `file`,
    /// `func`, `line` & `mask`, e.g. `file=net.c,mask=ew`. Only `mask` is required. Unknown
    /// keys are ignored (config files in the field carry junk segments; the reference library
    /// tolerated them and so do we).
    pub fn parse(text: &str) -> Result<Rule> {
        let text = text.trim();
        let mut rule = Rule::default();
        let mut saw_mask = false;

        for clause in text.split(',') {
            let (key, value) = match clause.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "prog" => rule.prog = Some(basename(value).to_string()),
                "modu" => rule.modu = Some(value.to_string()),
                "file" => rule.file = Some(basename(value).to_string()),
                "func" => rule.func = Some(value.to_string()),
                "line" => {
                    rule.line = Some(value.parse::<u32>().map_err(|_| Error::BadRuleLine {
                        rule: text.to_string(),
                        value: value.to_string(),
                        back: Backtrace::new(),
                    })?)
                }
                "mask" => {
                    let (set, clear) = parse_toggles(value).map_err(|c| Error::BadRuleMask {
                        rule: text.to_string(),
                        offending: Some(c),
                        back: Backtrace::new(),
                    })?;
                    rule.set = set;
                    rule.clear = clear;
                    saw_mask = true;
                }
                _ => {}
            }
        }

        if !saw_mask {
            return Err(Error::BadRuleMask {
                rule: text.to_string(),
                offending: None,
                back: Backtrace::new(),
            });
        }

        Ok(rule)
    }

    /// A predicate-free rule switching `mask` on; how an operator-configured default mask is
    /// expressed (as the first rule of the store, so later rules still win).
    pub fn from_mask(mask: Mask) -> Rule {
        Rule {
            set: mask,
            ..Rule::default()
        }
    }

    fn matches(&self, prog: &str, site: &CallSite) -> bool {
        if let Some(p) = &self.prog {
            if p != prog {
                return false;
            }
        }
        if let Some(m) = &self.modu {
            if m != site.modu {
                return false;
            }
        }
        if let Some(f) = &self.file {
            if f != basename(site.file) {
                return false;
            }
        }
        if let Some(h) = &self.func {
            if h != site.func {
                return false;
            }
        }
        if let Some(n) = self.line {
            if n != site.line {
                return false;
            }
        }
        true
    }

    fn apply(&self, mask: &mut Mask) {
        mask.clear(self.clear);
        mask.set(self.set);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct RuleStore                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The ordered rule list plus its version counter.
///
/// Mutations (rare, operator-triggered) take the write lock; [`evaluate`](RuleStore::evaluate)
/// takes the read lock, so a reader sees each mutation entirely or not at all -- never a torn
/// rule list. The version is bumped *inside* the write lock, after the mutation, so any reader
/// observing version `v` sees at least the rules of mutation `v`.
pub struct RuleStore {
    rules: RwLock<Vec<Rule>>,
    version: AtomicU64,
}

impl Default for RuleStore {
    fn default() -> Self {
        RuleStore::new()
    }
}

impl RuleStore {
    /// An empty store. The version starts at 1 so that zero can serve as "never resolved" in
    /// cache entries.
    pub fn new() -> RuleStore {
        RuleStore {
            rules: RwLock::new(Vec::new()),
            version: AtomicU64::new(1),
        }
    }

    /// Parse `text` & append the resulting rule; returns its index.
    pub fn add(&self, text: &str) -> Result<RuleId> {
        Ok(self.add_rule(Rule::parse(text)?))
    }

    /// Append an already-built rule; returns its index.
    pub fn add_rule(&self, rule: Rule) -> RuleId {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.push(rule);
        let id = rules.len() - 1;
        self.version.fetch_add(1, Ordering::Release);
        id
    }

    /// Remove the rule at `index`.
    pub fn remove(&self, index: usize) -> Result<()> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        if index >= rules.len() {
            return Err(Error::NoSuchRule {
                index,
                count: rules.len(),
                back: Backtrace::new(),
            });
        }
        rules.remove(index);
        self.version.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Drop every rule.
    pub fn clear(&self) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.clear();
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current version; cheap enough for every log call.
    pub fn snapshot_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Fold the stored rules, in order, over `site`: matching rules clear their `clear` bits
    /// then set their `set` bits, so the last rule touching a bit wins. Pure function of the
    /// stored rules & the inputs.
    pub fn evaluate(&self, prog: &str, site: &CallSite) -> Mask {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut mask = Mask::EMPTY;
        for rule in rules.iter().filter(|r| r.matches(prog, site)) {
            rule.apply(&mut mask);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(file: &'static str, line: u32) -> CallSite {
        CallSite {
            modu: "dalog::rule::tests",
            file,
            func: "test",
            line,
        }
    }

    #[test]
    fn test_parse() {
        let rule = Rule::parse("file=net.c,mask=ew").unwrap();
        assert_eq!(rule.file.as_deref(), Some("net.c"));
        assert!(rule.prog.is_none() && rule.modu.is_none() && rule.func.is_none());
        assert_eq!(rule.set, Mask::ERR | Mask::WARNING);

        // file= values are reduced to their basename
        let rule = Rule::parse("file=src/io/net.c,mask=e").unwrap();
        assert_eq!(rule.file.as_deref(), Some("net.c"));

        let rule = Rule::parse("prog=sewer,modu=net,func=drain,line=42,mask=ALL").unwrap();
        assert_eq!(rule.line, Some(42));
        assert_eq!(rule.set, Mask::SEVERITIES);

        // junk clauses are tolerated, a bad mask is not
        assert!(Rule::parse("pid=12,mask=e").is_ok());
        assert!(matches!(
            Rule::parse("file=net.c"),
            Err(Error::BadRuleMask { offending: None, .. })
        ));
        assert!(matches!(
            Rule::parse("mask=zap"),
            Err(Error::BadRuleMask {
                offending: Some('z'),
                ..
            })
        ));
        assert!(matches!(
            Rule::parse("line=nine,mask=e"),
            Err(Error::BadRuleLine { .. })
        ));
    }

    #[test]
    fn test_version_strictly_increases() {
        let store = RuleStore::new();
        let v0 = store.snapshot_version();
        store.add("mask=e").unwrap();
        assert_eq!(store.snapshot_version(), v0 + 1);
        store.add("file=net.c,mask=w").unwrap();
        assert_eq!(store.snapshot_version(), v0 + 2);
        store.remove(0).unwrap();
        assert_eq!(store.snapshot_version(), v0 + 3);
        store.clear();
        assert_eq!(store.snapshot_version(), v0 + 4);
    }

    #[test]
    fn test_remove_out_of_range() {
        let store = RuleStore::new();
        store.add("mask=e").unwrap();
        assert!(matches!(
            store.remove(1),
            Err(Error::NoSuchRule { index: 1, count: 1, .. })
        ));
    }

    #[test]
    fn test_later_rule_wins_per_bit() {
        let store = RuleStore::new();
        store.add("file=net.c,mask=ew").unwrap();
        store.add("file=net.c,mask=-w").unwrap();

        let mask = store.evaluate("prog", &site("net.c", 10));
        assert!(mask.contains(Mask::ERR));
        assert!(!mask.contains(Mask::WARNING));

        // other files are untouched
        assert_eq!(store.evaluate("prog", &site("disk.c", 10)), Mask::EMPTY);
    }

    #[test]
    fn test_predicates() {
        let store = RuleStore::new();
        store.add("mask=f").unwrap(); // unconditional
        store.add("prog=sewer,mask=e").unwrap();
        store.add("line=99,mask=d").unwrap();

        assert_eq!(
            store.evaluate("other", &site("net.c", 10)),
            Mask::FATAL
        );
        assert_eq!(
            store.evaluate("sewer", &site("net.c", 10)),
            Mask::FATAL | Mask::ERR
        );
        assert_eq!(
            store.evaluate("other", &site("net.c", 99)),
            Mask::FATAL | Mask::DEBUG
        );
    }

    #[test]
    fn test_clear_leaks_no_history() {
        let store = RuleStore::new();
        store.add("mask=ALL").unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.evaluate("prog", &site("net.c", 1)), Mask::EMPTY);
    }
}

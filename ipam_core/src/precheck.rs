//! Batch precheck: replay an operation's neighbourhood on a scratch trie
//!
//! The live trie is only read. For every key the operation touches, the
//! stored ancestors and the relevant descendants are copied (values
//! replaced by `()`) into a batch together with the post-operation record
//! of the touched key. The batch is replayed coarsest first into a private
//! scratch trie, and every record must pass the layering rules given what
//! has already been replayed:
//!
//! * a prefix may not sit below a range-bearing key,
//! * a range block may not sit below another range-bearing key,
//! * range blocks and addresses need an enclosing (or coinciding) prefix,
//! * all blocks of one range must share that enclosing prefix.

use crate::classifier::classify;
use crate::errors::Error;
use crate::parser::{Allocation, Kind};
use crate::record::PrefixRecord;
use crate::trie::AllocationTrie;
use crate::types::NetKey;
use log::{debug, info};
use metrics::counter;
use std::collections::HashMap;
use std::fmt;

/// Record shape replayed on the scratch trie.
pub type Placeholder = PrefixRecord<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Overlap,
    RangeConflict,
    Unanchored,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Overlap => f.write_str("overlap"),
            Reason::RangeConflict => f.write_str("range-conflict"),
            Reason::Unanchored => f.write_str("unanchored"),
        }
    }
}

/// First record of a batch that failed to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub key: NetKey,
    pub reason: Reason,
}

impl Rejection {
    /// Error reported by a mutation refused for `input`.
    pub fn into_error(self, input: &str) -> Error {
        let input = input.to_owned();
        match self.reason {
            Reason::Overlap => Error::Overlap(input),
            Reason::RangeConflict => Error::RangeConflict(input),
            Reason::Unanchored => Error::Unanchored(input),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

/// Candidate batch, deduplicated by key.
#[derive(Default)]
struct Batch {
    records: HashMap<NetKey, Placeholder>,
}

impl Batch {
    /// Copies the live record at `key`, unless the batch already holds one.
    fn seed<V>(&mut self, live: &AllocationTrie<PrefixRecord<V>>, key: &NetKey) {
        if let Some(rec) = live.get(key) {
            self.records
                .entry(*key)
                .or_insert_with(|| rec.placeholder());
        }
    }

    /// Ancestors of `key`, plus the descendants of its nearest ancestor
    /// (of `key` itself when it has none), plus `key`.
    fn seed_neighbourhood<V>(&mut self, live: &AllocationTrie<PrefixRecord<V>>, key: &NetKey) {
        let ancestors = live.ancestors(key);
        let scope = ancestors.last().copied().unwrap_or(*key);
        for a in &ancestors {
            self.seed(live, a);
        }
        for d in live.descendants(&scope) {
            self.seed(live, &d);
        }
        self.seed(live, key);
    }

    /// Adds the requested allocation to the record at `key`, applying the
    /// same-key layering rules.
    fn merge_new(&mut self, key: NetKey, kind: Kind, id: &str) -> Result<(), Rejection> {
        let rec = self.records.entry(key).or_default();
        match kind {
            Kind::Prefix => {
                if rec.has_range() {
                    return Err(Rejection {
                        key,
                        reason: Reason::RangeConflict,
                    });
                }
                rec.set_prefix(id, ());
            }
            Kind::Range => {
                if rec.range_ids().any(|other| other != id) {
                    return Err(Rejection {
                        key,
                        reason: Reason::Overlap,
                    });
                }
                rec.insert_range(id, ());
            }
            Kind::Address => {
                rec.set_address(id, ());
            }
        }
        Ok(())
    }

    /// Replaces the record at `key` by the live one minus entry `id`.
    fn retract<V>(&mut self, live: &AllocationTrie<PrefixRecord<V>>, key: NetKey, kind: Kind, id: &str) {
        let Some(rec) = live.get(&key) else {
            return;
        };
        let mut rec = rec.placeholder();
        match kind {
            Kind::Prefix => rec.take_prefix(id),
            Kind::Range => rec.remove_range(id),
            Kind::Address => rec.take_address(id),
        };
        if rec.is_empty() {
            self.records.remove(&key);
        } else {
            self.records.insert(key, rec);
        }
    }

    /// Coarsest first; ties by family, then address.
    fn into_sorted(self) -> Vec<(NetKey, Placeholder)> {
        let mut out: Vec<_> = self.records.into_iter().collect();
        out.sort_by_key(|(key, _)| key.specificity());
        out
    }
}

/// Precheck engine owning the scratch trie.
#[derive(Debug, Default)]
pub struct Precheck {
    scratch: AllocationTrie<Placeholder>,
}

impl Precheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scratch trie as left by the last replay.
    pub fn scratch(&self) -> &AllocationTrie<Placeholder> {
        &self.scratch
    }

    /// Would adding `alloc` to `live` keep it consistent?
    pub fn addition<V>(
        &mut self,
        live: &AllocationTrie<PrefixRecord<V>>,
        alloc: &Allocation,
    ) -> Result<Verdict, Error> {
        let id = alloc.id();
        let keys = alloc.keys()?;
        let mut batch = Batch::default();
        for key in &keys {
            batch.seed_neighbourhood(live, key);
        }
        for key in &keys {
            if let Err(rejection) = batch.merge_new(*key, alloc.kind(), &id) {
                return Ok(self.conclude("addition", &id, Verdict::Rejected(rejection)));
            }
        }
        let verdict = match self.replay(batch)? {
            // a range swallowing a stored prefix overlaps it
            Verdict::Rejected(mut r) if alloc.kind() == Kind::Range => {
                if r.reason == Reason::RangeConflict {
                    r.reason = Reason::Overlap;
                }
                Verdict::Rejected(r)
            }
            v => v,
        };
        Ok(self.conclude("addition", &id, verdict))
    }

    /// Would removing `alloc` from `live` keep it consistent?
    pub fn deletion<V>(
        &mut self,
        live: &AllocationTrie<PrefixRecord<V>>,
        alloc: &Allocation,
    ) -> Result<Verdict, Error> {
        let id = alloc.id();
        let keys = alloc.keys()?;
        let mut batch = Batch::default();
        for key in &keys {
            for a in live.ancestors(key) {
                batch.seed(live, &a);
            }
            for d in live.descendants(key) {
                batch.seed(live, &d);
            }
        }
        for key in &keys {
            batch.retract(live, *key, alloc.kind(), &id);
        }
        let verdict = self.replay(batch)?;
        Ok(self.conclude("deletion", &id, verdict))
    }

    fn conclude(&self, op: &str, id: &str, verdict: Verdict) -> Verdict {
        counter!("ipam_prechecks_total").increment(1);
        match verdict {
            Verdict::Approved => info!("[PRECHECK] {op} of {id}: approved"),
            Verdict::Rejected(r) => {
                counter!("ipam_precheck_rejections_total").increment(1);
                info!("[PRECHECK] {op} of {id}: rejected ({} at {})", r.reason, r.key);
            }
        }
        verdict
    }

    fn replay(&mut self, batch: Batch) -> Result<Verdict, Error> {
        self.scratch.clear();
        let ordered = batch.into_sorted();
        debug!("[PRECHECK] replaying {} candidates", ordered.len());

        let mut anchors: HashMap<String, NetKey> = HashMap::new();
        let mut verdict = Verdict::Approved;
        for (key, rec) in ordered {
            if let Some(rejection) = self.simulate_add(key, rec, &mut anchors)? {
                verdict = Verdict::Rejected(rejection);
                break;
            }
        }
        #[cfg(feature = "trace")]
        self.dump();
        Ok(verdict)
    }

    /// Inserts one candidate into the scratch trie if the layering rules
    /// allow it.
    fn simulate_add(
        &mut self,
        key: NetKey,
        rec: Placeholder,
        anchors: &mut HashMap<String, NetKey>,
    ) -> Result<Option<Rejection>, Error> {
        let reject = move |reason: Reason| -> Result<Option<Rejection>, Error> {
            Ok(Some(Rejection { key, reason }))
        };

        if classify(&self.scratch, &key).is_collision() {
            return reject(Reason::Overlap);
        }

        let mut under_range = false;
        let mut anchor = None;
        for a in self.scratch.ancestors(&key) {
            if let Some(up) = self.scratch.get(&a) {
                under_range |= up.has_range();
                if up.has_prefix() {
                    anchor = Some(a);
                }
            }
        }

        if rec.has_prefix() {
            if under_range {
                return reject(Reason::RangeConflict);
            }
            anchor = Some(key);
        }
        if rec.has_range() {
            if under_range {
                return reject(Reason::Overlap);
            }
            let Some(anchor) = anchor else {
                return reject(Reason::Unanchored);
            };
            for id in rec.range_ids() {
                match anchors.get(id) {
                    Some(prev) if *prev != anchor => return reject(Reason::Overlap),
                    Some(_) => {}
                    None => {
                        anchors.insert(id.to_owned(), anchor);
                    }
                }
            }
        }
        if rec.has_address() && anchor.is_none() {
            return reject(Reason::Unanchored);
        }

        self.scratch.insert(key, rec)?;
        Ok(None)
    }

    #[cfg(feature = "trace")]
    fn dump(&self) {
        for (key, rec) in self.scratch.iter() {
            log::trace!("[PRECHECK] scratch {key} flags={:03b}", rec.flags().bits());
        }
    }
}

//! IPAM engine: validated mutations and queries over the live trie

use crate::classifier::{classify, Classification};
use crate::errors::Error;
use crate::parser::{Allocation, Kind};
use crate::precheck::{Precheck, Verdict};
use crate::record::PrefixRecord;
use crate::trie::AllocationTrie;
use crate::types::NetKey;
use log::{debug, info, trace, warn};
use metrics::{counter, gauge};
use std::net::IpAddr;

/// Address-space manager.
///
/// Every `add_*` call runs the addition precheck for its own input first
/// and changes nothing when it is rejected. Deletes are exact-key and do no
/// checking of their own; [`Ipam::release`] is the checked variant.
#[derive(Debug)]
pub struct Ipam<V> {
    live: AllocationTrie<PrefixRecord<V>>,
    precheck: Precheck,
}

impl<V> Default for Ipam<V> {
    fn default() -> Self {
        Self {
            live: AllocationTrie::new(),
            precheck: Precheck::new(),
        }
    }
}

fn parse_kind(text: &str, kind: Kind) -> Result<Allocation, Error> {
    text.parse::<Allocation>()?.expect_kind(kind, text)
}

impl<V> Ipam<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Read-only view of the live trie.
    pub fn tree(&self) -> &AllocationTrie<PrefixRecord<V>> {
        &self.live
    }

    pub fn clear(&mut self) {
        self.live.clear();
        gauge!("ipam_nodes").set(0.0);
        info!("[CLEAR] live tree emptied");
    }

    // ---------------------------------------------------------------- //
    // precheck
    // ---------------------------------------------------------------- //

    /// `true` if allocating `text` would be accepted right now.
    pub fn precheck_addition(&mut self, text: &str) -> Result<bool, Error> {
        let alloc: Allocation = text.parse()?;
        Ok(self.precheck.addition(&self.live, &alloc)?.is_approved())
    }

    /// `true` if releasing `text` leaves every remaining allocation valid.
    pub fn precheck_deletion(&mut self, text: &str) -> Result<bool, Error> {
        let alloc: Allocation = text.parse()?;
        Ok(self.precheck.deletion(&self.live, &alloc)?.is_approved())
    }

    fn approve(&mut self, alloc: &Allocation) -> Result<(), Error> {
        match self.precheck.addition(&self.live, alloc)? {
            Verdict::Approved => Ok(()),
            Verdict::Rejected(rejection) => {
                warn!(
                    "[ADD-{}] {} refused: {} at {}",
                    tag(alloc.kind()),
                    alloc.id(),
                    rejection.reason,
                    rejection.key
                );
                Err(rejection.into_error(&alloc.id()))
            }
        }
    }

    // ---------------------------------------------------------------- //
    // mutations
    // ---------------------------------------------------------------- //

    pub fn add_prefix(&mut self, text: &str, value: V) -> Result<(), Error> {
        let alloc = parse_kind(text, Kind::Prefix)?;
        self.add_single(alloc, value)
    }

    /// Allocates a single host address. It must lie inside a prefix
    /// allocation; range territory is fine.
    pub fn add_address(&mut self, text: &str, value: V) -> Result<(), Error> {
        let alloc = parse_kind(text, Kind::Address)?;
        self.add_single(alloc, value)
    }

    fn add_single(&mut self, alloc: Allocation, value: V) -> Result<(), Error> {
        let key = match alloc {
            Allocation::Prefix(key) => key,
            Allocation::Address(addr) => NetKey::host(addr),
            Allocation::Range(range) => {
                return Err(Error::parse(&range.to_string(), "expected a single key"))
            }
        };
        self.approve(&alloc)?;
        let id = alloc.id();
        self.commit(key, alloc.kind(), &id, value)?;
        self.committed(alloc.kind(), "add", &id);
        Ok(())
    }

    /// Stores one entry at `key`, creating the record if needed.
    fn commit(&mut self, key: NetKey, kind: Kind, id: &str, value: V) -> Result<(), Error> {
        if let Some(rec) = self.live.get_mut(&key) {
            trace!("[COMMIT] {id} merged into {key}");
            match kind {
                Kind::Prefix => rec.set_prefix(id, value),
                Kind::Range => rec.insert_range(id, value),
                Kind::Address => rec.set_address(id, value),
            };
            return Ok(());
        }
        let rec = match kind {
            Kind::Prefix => PrefixRecord::with_prefix(id, value),
            Kind::Range => PrefixRecord::with_range(id, value),
            Kind::Address => PrefixRecord::with_address(id, value),
        };
        trace!("[COMMIT] {id} stored at new key {key}");
        self.live.insert(key, rec)?;
        Ok(())
    }

    pub fn delete_prefix(&mut self, text: &str) -> Result<(), Error> {
        let alloc = parse_kind(text, Kind::Prefix)?;
        self.retire(&alloc)
    }

    /// Removes the range from every block of its decomposition.
    pub fn delete_range(&mut self, text: &str) -> Result<(), Error> {
        let alloc = parse_kind(text, Kind::Range)?;
        self.retire(&alloc)
    }

    pub fn delete_address(&mut self, text: &str) -> Result<(), Error> {
        let alloc = parse_kind(text, Kind::Address)?;
        self.retire(&alloc)
    }

    /// Checked delete: runs the deletion precheck and refuses with
    /// [`Error::DeleteRejected`] when it fails.
    pub fn release(&mut self, text: &str) -> Result<(), Error> {
        let alloc: Allocation = text.parse()?;
        if !self.precheck.deletion(&self.live, &alloc)?.is_approved() {
            warn!("[RELEASE] {} refused", alloc.id());
            return Err(Error::DeleteRejected(alloc.id()));
        }
        self.retire(&alloc)
    }

    /// Drops the entry of `alloc` from each of its keys; records left empty
    /// are removed. Absent entries are skipped.
    fn retire(&mut self, alloc: &Allocation) -> Result<(), Error> {
        let id = alloc.id();
        let kind = alloc.kind();
        let keys = alloc.keys()?;
        let mut removed = 0usize;
        for key in keys {
            let Some(rec) = self.live.get_mut(&key) else {
                continue;
            };
            let hit = match kind {
                Kind::Prefix => rec.take_prefix(&id).is_some(),
                Kind::Range => rec.remove_range(&id).is_some(),
                Kind::Address => rec.take_address(&id).is_some(),
            };
            if !hit {
                continue;
            }
            removed += 1;
            if rec.is_empty() {
                self.live.remove(&key);
                trace!("[DELETE-{}] {key} emptied and removed", tag(kind));
            }
        }
        if removed == 0 {
            debug!("[DELETE-{}] {id} not stored, nothing to do", tag(kind));
        } else {
            self.committed(kind, "delete", &id);
        }
        Ok(())
    }

    fn committed(&self, kind: Kind, verb: &str, id: &str) {
        let op = match (verb, kind) {
            ("add", Kind::Prefix) => "add_prefix",
            ("add", Kind::Range) => "add_range",
            ("add", Kind::Address) => "add_address",
            (_, Kind::Prefix) => "delete_prefix",
            (_, Kind::Range) => "delete_range",
            (_, Kind::Address) => "delete_address",
        };
        counter!("ipam_mutations_total", "op" => op).increment(1);
        gauge!("ipam_nodes").set(self.live.len() as f64);
        info!("[{}-{}] {id} (nodes={})", verb.to_uppercase(), tag(kind), self.live.len());
    }

    // ---------------------------------------------------------------- //
    // queries
    // ---------------------------------------------------------------- //

    /// Most specific stored key covering `addr`.
    pub fn lookup(&self, addr: IpAddr) -> Option<(NetKey, &PrefixRecord<V>)> {
        self.live.match_address(addr)
    }

    pub fn record(&self, key: &NetKey) -> Option<&PrefixRecord<V>> {
        self.live.get(key)
    }

    /// Value stored for the allocation named by `text`.
    pub fn get(&self, text: &str) -> Result<Option<&V>, Error> {
        let alloc: Allocation = text.parse()?;
        let id = alloc.id();
        let keys = alloc.keys()?;
        Ok(keys
            .first()
            .and_then(|key| self.live.get(key))
            .and_then(|rec| rec.get(&id)))
    }

    /// Classifies `text` against the live trie.
    pub fn classify(&self, text: &str) -> Result<Classification<'_, PrefixRecord<V>>, Error> {
        let alloc: Allocation = text.parse()?;
        Ok(match alloc {
            Allocation::Prefix(key) => classify(&self.live, &key),
            Allocation::Range(range) => classify(&self.live, &range),
            Allocation::Address(addr) => classify(&self.live, &NetKey::host(addr)),
        })
    }

    /// Stored keys enclosing `text`, coarsest first.
    pub fn parents(&self, text: &str) -> Result<Vec<NetKey>, Error> {
        self.related(text, |trie, key| trie.ancestors(key))
    }

    /// Stored keys strictly inside `text`, coarsest first.
    pub fn children(&self, text: &str) -> Result<Vec<NetKey>, Error> {
        self.related(text, |trie, key| trie.descendants(key))
    }

    fn related<F>(&self, text: &str, project: F) -> Result<Vec<NetKey>, Error>
    where
        F: Fn(&AllocationTrie<PrefixRecord<V>>, &NetKey) -> Vec<NetKey>,
    {
        let alloc: Allocation = text.parse()?;
        let keys = alloc.keys()?;
        let mut out: Vec<NetKey> = keys
            .iter()
            .flat_map(|key| project(&self.live, key))
            .filter(|key| !keys.contains(key))
            .collect();
        out.sort_by_key(NetKey::specificity);
        out.dedup();
        Ok(out)
    }

    /// Visits every stored `(key, record)` until the visitor returns `false`.
    pub fn walk<F>(&self, visitor: F)
    where
        F: FnMut(&NetKey, &PrefixRecord<V>) -> bool,
    {
        self.live.walk(visitor)
    }
}

impl<V: Clone> Ipam<V> {
    /// Allocates a range; the value is stored on every block of its
    /// decomposition. Either every block is written or none.
    ///
    /// Fails with `Overlap` when a block meets another range or swallows a
    /// stored prefix, and with `Unanchored` when no prefix encloses the range.
    pub fn add_range(&mut self, text: &str, value: V) -> Result<(), Error> {
        let alloc = parse_kind(text, Kind::Range)?;
        self.add_blocks(alloc, value)
    }

    fn add_blocks(&mut self, alloc: Allocation, value: V) -> Result<(), Error> {
        let blocks = alloc.keys()?;
        self.approve(&alloc)?;
        let id = alloc.id();
        debug!("[ADD-RANGE] {id} -> {} blocks", blocks.len());
        for key in blocks {
            self.commit(key, Kind::Range, &id, value.clone())?;
        }
        self.committed(Kind::Range, "add", &id);
        Ok(())
    }

    /// Dispatches on the grammar: prefix, range or address.
    pub fn allocate(&mut self, text: &str, value: V) -> Result<(), Error> {
        let alloc: Allocation = text.parse()?;
        match alloc.kind() {
            Kind::Range => self.add_blocks(alloc, value),
            Kind::Prefix | Kind::Address => self.add_single(alloc, value),
        }
    }

    /// Replaces the value of an existing allocation, returning the old one.
    pub fn update(&mut self, text: &str, value: V) -> Result<V, Error> {
        let alloc: Allocation = text.parse()?;
        let id = alloc.id();
        let keys = alloc.keys()?;
        let present = keys
            .iter()
            .all(|key| self.live.get(key).is_some_and(|rec| rec.get(&id).is_some()));
        if !present {
            return Err(Error::NotFound(id));
        }
        let mut old = None;
        for key in &keys {
            if let Some(slot) = self.live.get_mut(key).and_then(|rec| rec.get_mut(&id)) {
                old = Some(std::mem::replace(slot, value.clone()));
            }
        }
        debug!("[UPDATE] {id} across {} keys", keys.len());
        old.ok_or(Error::NotFound(id))
    }
}

fn tag(kind: Kind) -> &'static str {
    match kind {
        Kind::Prefix => "PREFIX",
        Kind::Range => "RANGE",
        Kind::Address => "ADDRESS",
    }
}

//! Node payload: which allocations occupy a key, and their values

use crate::types::Flags;
use std::collections::BTreeMap;

/// Payload stored at one trie key.
///
/// A key can host at most one prefix allocation and one address allocation
/// (both identified by the canonical text of the key) and any number of
/// range allocations whose decomposition produced this exact block. The
/// flags are derived from which of these are present, so a record can never
/// claim a kind it holds no entry for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRecord<V> {
    prefix: Option<(String, V)>,
    ranges: BTreeMap<String, V>,
    address: Option<(String, V)>,
}

impl<V> Default for PrefixRecord<V> {
    fn default() -> Self {
        Self {
            prefix: None,
            ranges: BTreeMap::new(),
            address: None,
        }
    }
}

impl<V> PrefixRecord<V> {
    pub fn with_prefix(id: impl Into<String>, value: V) -> Self {
        Self {
            prefix: Some((id.into(), value)),
            ..Self::default()
        }
    }

    pub fn with_range(id: impl Into<String>, value: V) -> Self {
        let mut rec = Self::default();
        rec.ranges.insert(id.into(), value);
        rec
    }

    pub fn with_address(id: impl Into<String>, value: V) -> Self {
        Self {
            address: Some((id.into(), value)),
            ..Self::default()
        }
    }

    pub fn flags(&self) -> Flags {
        Flags {
            has_prefix: self.has_prefix(),
            has_range: self.has_range(),
            has_address: self.has_address(),
        }
    }

    pub fn has_prefix(&self) -> bool {
        self.prefix.is_some()
    }

    pub fn has_range(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn has_address(&self) -> bool {
        self.address.is_some()
    }

    /// True once the last allocation left; such a record must not stay stored.
    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.ranges.is_empty() && self.address.is_none()
    }

    /// Number of entries (prefix + ranges + address).
    pub fn len(&self) -> usize {
        self.ranges.len() + self.prefix.is_some() as usize + self.address.is_some() as usize
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries().find(|(k, _)| *k == id).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut V> {
        if let Some((k, v)) = self.prefix.as_mut() {
            if k == id {
                return Some(v);
            }
        }
        if let Some((k, v)) = self.address.as_mut() {
            if k == id {
                return Some(v);
            }
        }
        self.ranges.get_mut(id)
    }

    /// Every `(identifier, value)` pair: prefix, then ranges, then address.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &V)> {
        self.prefix
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .chain(self.ranges.iter().map(|(k, v)| (k.as_str(), v)))
            .chain(self.address.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn prefix_id(&self) -> Option<&str> {
        self.prefix.as_ref().map(|(k, _)| k.as_str())
    }

    pub fn range_ids(&self) -> impl Iterator<Item = &str> {
        self.ranges.keys().map(String::as_str)
    }

    pub fn address_id(&self) -> Option<&str> {
        self.address.as_ref().map(|(k, _)| k.as_str())
    }

    pub(crate) fn set_prefix(&mut self, id: impl Into<String>, value: V) -> Option<V> {
        self.prefix.replace((id.into(), value)).map(|(_, v)| v)
    }

    /// Removes the prefix entry if it is the one named `id`.
    pub(crate) fn take_prefix(&mut self, id: &str) -> Option<V> {
        match &self.prefix {
            Some((k, _)) if k == id => self.prefix.take().map(|(_, v)| v),
            _ => None,
        }
    }

    pub(crate) fn insert_range(&mut self, id: impl Into<String>, value: V) -> Option<V> {
        self.ranges.insert(id.into(), value)
    }

    pub(crate) fn remove_range(&mut self, id: &str) -> Option<V> {
        self.ranges.remove(id)
    }

    pub(crate) fn set_address(&mut self, id: impl Into<String>, value: V) -> Option<V> {
        self.address.replace((id.into(), value)).map(|(_, v)| v)
    }

    pub(crate) fn take_address(&mut self, id: &str) -> Option<V> {
        match &self.address {
            Some((k, _)) if k == id => self.address.take().map(|(_, v)| v),
            _ => None,
        }
    }

    /// Same identifiers, values replaced by the unit placeholder.
    pub(crate) fn placeholder(&self) -> PrefixRecord<()> {
        PrefixRecord {
            prefix: self.prefix.as_ref().map(|(k, _)| (k.clone(), ())),
            ranges: self.ranges.keys().map(|k| (k.clone(), ())).collect(),
            address: self.address.as_ref().map(|(k, _)| (k.clone(), ())),
        }
    }
}

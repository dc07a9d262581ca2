//! Overlap classification by matching both ends of a span.

use crate::trie::AllocationTrie;
use crate::types::{NetKey, Span};
use log::debug;
use std::fmt;

/// Where a candidate would land relative to what is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a, T> {
    /// Neither endpoint is covered by any stored key.
    Free,
    /// Both endpoints resolve to the same stored key.
    Merge(NetKey, &'a T),
    /// The endpoints resolve to different keys, or only one is covered.
    Collision,
}

impl<T> Classification<'_, T> {
    pub fn is_collision(&self) -> bool {
        matches!(self, Classification::Collision)
    }

    /// Matched key of a `Merge`.
    pub fn matched(&self) -> Option<NetKey> {
        match self {
            Classification::Merge(key, _) => Some(*key),
            _ => None,
        }
    }
}

impl<T> fmt::Display for Classification<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Free => f.write_str("free"),
            Classification::Merge(key, _) => write!(f, "merge({key})"),
            Classification::Collision => f.write_str("collision"),
        }
    }
}

/// Classifies `span` against `trie`.
///
/// Matching only one endpoint would miss a candidate that straddles the
/// boundary between two stored neighbours, so both are looked up.
pub fn classify<'a, T, S>(trie: &'a AllocationTrie<T>, span: &S) -> Classification<'a, T>
where
    S: Span + ?Sized,
{
    let first = trie.match_address(span.first());
    let last = trie.match_address(span.last());
    let verdict = match (first, last) {
        (None, None) => Classification::Free,
        (Some((a, rec)), Some((b, _))) if a == b => Classification::Merge(a, rec),
        _ => Classification::Collision,
    };
    debug!(
        "[CLASSIFY] {}..{} -> {}",
        span.first(),
        span.last(),
        verdict
    );
    verdict
}

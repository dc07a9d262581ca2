//! Binary Patricia trie keyed by [`NetKey`]
//!
//! Nodes live in an arena (`Vec`) and link to each other by index; freed
//! slots are recycled through a free list. Each address family has its own
//! root. A node either stores a value (a *terminal* node, one per stored
//! key) or is an internal glue node created by a split; glue nodes always
//! have two children and are pruned as soon as they do not.

use crate::errors::Error;
use crate::helpers::{addr_bits, common_prefix_len, get_bit, mask};
use crate::types::{Family, NetKey};
use log::trace;
use std::net::IpAddr;

#[derive(Debug, Clone)]
struct Node<T> {
    key: NetKey,
    bits: u128,
    prefix_len: u8,
    value: Option<T>,
    left: Option<usize>,
    right: Option<usize>,
}

impl<T> Node<T> {
    #[inline]
    fn child(&self, bit: u8) -> Option<usize> {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    /// Whether this node's prefix covers `bits` (compared up to its own length).
    #[inline]
    fn covers(&self, bits: u128) -> bool {
        common_prefix_len(bits, self.bits, self.prefix_len) == self.prefix_len
    }
}

/// Where a node hangs: a family root or one side of a parent.
#[derive(Debug, Clone, Copy)]
enum Link {
    Root(Family),
    Left(usize),
    Right(usize),
}

/// Binary radix index over IP networks, one value per distinct key.
#[derive(Debug, Clone)]
pub struct AllocationTrie<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    v4_root: Option<usize>,
    v6_root: Option<usize>,
    len: usize,
}

impl<T> Default for AllocationTrie<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            v4_root: None,
            v6_root: None,
            len: 0,
        }
    }
}

impl<T> AllocationTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys (glue nodes excluded).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.v4_root = None;
        self.v6_root = None;
        self.len = 0;
    }

    #[inline]
    fn root(&self, family: Family) -> Option<usize> {
        match family {
            Family::V4 => self.v4_root,
            Family::V6 => self.v6_root,
        }
    }

    #[inline]
    fn link_get(&self, link: Link) -> Option<usize> {
        match link {
            Link::Root(family) => self.root(family),
            Link::Left(i) => self.nodes[i].left,
            Link::Right(i) => self.nodes[i].right,
        }
    }

    #[inline]
    fn link_set(&mut self, link: Link, target: Option<usize>) {
        match link {
            Link::Root(Family::V4) => self.v4_root = target,
            Link::Root(Family::V6) => self.v6_root = target,
            Link::Left(i) => self.nodes[i].left = target,
            Link::Right(i) => self.nodes[i].right = target,
        }
    }

    fn alloc_node(&mut self, key: NetKey, value: Option<T>) -> usize {
        let node = Node {
            bits: key.bits(),
            prefix_len: key.prefix_len(),
            key,
            value,
            left: None,
            right: None,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn free_node(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.value = None;
        node.left = None;
        node.right = None;
        self.free.push(idx);
    }

    /// Inserts or overwrites the value stored at `key`, returning the old one.
    ///
    /// Fails only if a glue key for a split cannot be built.
    pub fn insert(&mut self, key: NetKey, value: T) -> Result<Option<T>, Error> {
        let family = key.family();
        let bits = key.bits();
        let prefix_len = key.prefix_len();
        let mut link = Link::Root(family);

        loop {
            // --- Case 1: Empty Link ---
            let Some(cur) = self.link_get(link) else {
                trace!("[TRIE] insert {key}: empty link, new leaf");
                let leaf = self.alloc_node(key, Some(value));
                self.link_set(link, Some(leaf));
                self.len += 1;
                return Ok(None);
            };

            let cur_bits = self.nodes[cur].bits;
            let cur_len = self.nodes[cur].prefix_len;
            let cpl = common_prefix_len(bits, cur_bits, prefix_len.min(cur_len));

            // --- Case 2a: Exact Match ---
            if cpl == prefix_len && cpl == cur_len {
                let old = self.nodes[cur].value.replace(value);
                if old.is_none() {
                    trace!("[TRIE] insert {key}: glue node becomes terminal");
                    self.len += 1;
                }
                return Ok(old);
            }

            // --- Case 2b: Insert Above (shorter prefix) ---
            if cpl == prefix_len {
                trace!("[TRIE] insert {key}: above {}", self.nodes[cur].key);
                let node = self.alloc_node(key, Some(value));
                if get_bit(cur_bits, prefix_len) == 0 {
                    self.nodes[node].left = Some(cur);
                } else {
                    self.nodes[node].right = Some(cur);
                }
                self.link_set(link, Some(node));
                self.len += 1;
                return Ok(None);
            }

            // --- Case 2c: Split at the first differing bit ---
            if cpl < cur_len {
                let glue_key = NetKey::from_bits(family, bits & mask(cpl), cpl)?;
                trace!("[TRIE] insert {key}: split at {glue_key}");
                let glue = self.alloc_node(glue_key, None);
                let leaf = self.alloc_node(key, Some(value));
                if get_bit(bits, cpl) == 0 {
                    self.nodes[glue].left = Some(leaf);
                    self.nodes[glue].right = Some(cur);
                } else {
                    self.nodes[glue].left = Some(cur);
                    self.nodes[glue].right = Some(leaf);
                }
                self.link_set(link, Some(glue));
                self.len += 1;
                return Ok(None);
            }

            // --- Case 2d: Descend (current node is a proper prefix) ---
            link = if get_bit(bits, cur_len) == 0 {
                Link::Left(cur)
            } else {
                Link::Right(cur)
            };
        }
    }

    /// Index of the node carrying exactly `key`, terminal or not.
    fn find(&self, key: &NetKey) -> Option<usize> {
        let bits = key.bits();
        let prefix_len = key.prefix_len();
        let mut cur = self.root(key.family());
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if node.prefix_len > prefix_len || !node.covers(bits) {
                return None;
            }
            if node.prefix_len == prefix_len {
                return Some(i);
            }
            cur = node.child(get_bit(bits, node.prefix_len));
        }
        None
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &NetKey) -> Option<&T> {
        self.find(key).and_then(|i| self.nodes[i].value.as_ref())
    }

    pub fn get_mut(&mut self, key: &NetKey) -> Option<&mut T> {
        self.find(key).and_then(|i| self.nodes[i].value.as_mut())
    }

    pub fn contains_key(&self, key: &NetKey) -> bool {
        self.get(key).is_some()
    }

    /// Removes the value stored at `key`; `None` if nothing was stored there.
    pub fn remove(&mut self, key: &NetKey) -> Option<T> {
        let bits = key.bits();
        let prefix_len = key.prefix_len();
        let mut link = Link::Root(key.family());
        // links leading to the ancestors of the removed node, root first
        let mut path: Vec<Link> = Vec::new();

        loop {
            let cur = self.link_get(link)?;
            let node = &self.nodes[cur];
            if node.prefix_len > prefix_len || !node.covers(bits) {
                return None;
            }
            if node.prefix_len == prefix_len {
                let value = self.nodes[cur].value.take()?;
                self.len -= 1;
                trace!("[TRIE] remove {key}");
                self.try_prune(link);
                // ancestors may now be unary glue, give prune a chance
                for &up in path.iter().rev() {
                    self.try_prune(up);
                }
                return Some(value);
            }
            path.push(link);
            link = if get_bit(bits, node.prefix_len) == 0 {
                Link::Left(cur)
            } else {
                Link::Right(cur)
            };
        }
    }

    /// If `link` points at a non-terminal node with fewer than two children,
    /// graft its only child (or nothing) into the link and recycle the node.
    fn try_prune(&mut self, link: Link) {
        let Some(idx) = self.link_get(link) else {
            return;
        };
        let node = &self.nodes[idx];
        if node.value.is_some() {
            return;
        }
        let replacement = match (node.left, node.right) {
            (None, None) => None,
            (Some(c), None) | (None, Some(c)) => Some(c),
            _ => return,
        };
        self.link_set(link, replacement);
        self.free_node(idx);
    }

    /// Longest-prefix match: the most specific stored key containing `addr`.
    pub fn match_address(&self, addr: IpAddr) -> Option<(NetKey, &T)> {
        let (family, bits) = addr_bits(addr);
        let max = family.max_len();
        let mut best = None;
        let mut cur = self.root(family);
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if !node.covers(bits) {
                break;
            }
            if let Some(v) = node.value.as_ref() {
                best = Some((node.key, v));
            }
            if node.prefix_len >= max {
                break;
            }
            cur = node.child(get_bit(bits, node.prefix_len));
        }
        best
    }

    /// Stored keys strictly less specific than `key` whose network contains
    /// it, least specific first.
    pub fn ancestors(&self, key: &NetKey) -> Vec<NetKey> {
        let bits = key.bits();
        let prefix_len = key.prefix_len();
        let mut out = Vec::new();
        let mut cur = self.root(key.family());
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if node.prefix_len >= prefix_len || !node.covers(bits) {
                break;
            }
            if node.value.is_some() {
                out.push(node.key);
            }
            cur = node.child(get_bit(bits, node.prefix_len));
        }
        out
    }

    /// Stored keys strictly more specific than `key` and contained in it,
    /// in pre-order (address ascending, shorter first on ties).
    pub fn descendants(&self, key: &NetKey) -> Vec<NetKey> {
        let bits = key.bits();
        let prefix_len = key.prefix_len();
        let mut cur = self.root(key.family());
        let mut top = None;
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if node.prefix_len >= prefix_len {
                if common_prefix_len(node.bits, bits, prefix_len) == prefix_len {
                    top = Some(i);
                }
                break;
            }
            if !node.covers(bits) {
                break;
            }
            cur = node.child(get_bit(bits, node.prefix_len));
        }
        let Some(top) = top else {
            return Vec::new();
        };
        self.subtree(top)
            .filter(|(k, _)| k.prefix_len() > prefix_len)
            .map(|(k, _)| k)
            .collect()
    }

    fn subtree(&self, top: usize) -> Iter<'_, T> {
        Iter {
            trie: self,
            stack: vec![top],
        }
    }

    /// Every stored `(key, value)`, IPv4 first, each family in pre-order.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut stack = Vec::with_capacity(2);
        // popped last-in first-out, v4 comes out first
        stack.extend(self.v6_root);
        stack.extend(self.v4_root);
        Iter { trie: self, stack }
    }

    /// Visits every stored pair until the visitor returns `false`.
    pub fn walk<F>(&self, mut visitor: F)
    where
        F: FnMut(&NetKey, &T) -> bool,
    {
        for (key, value) in self.iter() {
            if !visitor(&key, value) {
                return;
            }
        }
    }
}

/// Depth-first iterator over stored entries.
pub struct Iter<'a, T> {
    trie: &'a AllocationTrie<T>,
    stack: Vec<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NetKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(i) = self.stack.pop() {
            let node = &self.trie.nodes[i];
            self.stack.extend(node.right);
            self.stack.extend(node.left);
            if let Some(v) = node.value.as_ref() {
                return Some((node.key, v));
            }
        }
        None
    }
}

impl<'a, T> IntoIterator for &'a AllocationTrie<T> {
    type Item = (NetKey, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

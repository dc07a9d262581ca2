//! Data structures shared by the trie, the classifier and the engines

use crate::constants::{FLAG_ADDRESS, FLAG_PREFIX, FLAG_RANGE, V4_BITS, V6_BITS};
use crate::errors::Error;
use crate::helpers::{addr_bits, bits_addr, canonical};
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

/// Address family. The two families are disjoint key spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn max_len(self) -> u8 {
        match self {
            Family::V4 => V4_BITS,
            Family::V6 => V6_BITS,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => f.write_str("IPv4"),
            Family::V6 => f.write_str("IPv6"),
        }
    }
}

/// IP Network Key: family, masked base address and prefix length.
///
/// Host bits are always zero, so two keys compare equal iff they denote the
/// same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetKey(IpNet);

impl NetKey {
    pub fn new(net: IpNet) -> Self {
        NetKey(net.trunc())
    }

    /// Key of a single host (`/32` or `/128`).
    pub fn host(addr: IpAddr) -> Self {
        NetKey(IpNet::from(addr))
    }

    /// Builds a key from left-aligned bits; host bits are masked off.
    pub fn from_bits(family: Family, bits: u128, prefix_len: u8) -> Result<Self, Error> {
        if prefix_len > family.max_len() {
            return Err(Error::Store(format!("{family} prefix length {prefix_len}")));
        }
        let addr = bits_addr(family, canonical(bits, prefix_len));
        IpNet::new(addr, prefix_len)
            .map(NetKey)
            .map_err(|e| Error::Store(format!("{addr}/{prefix_len}: {e}")))
    }

    pub fn family(&self) -> Family {
        match self.0 {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }

    pub fn bits(&self) -> u128 {
        addr_bits(self.0.network()).1
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn net(&self) -> IpNet {
        self.0
    }

    /// Whether `other` lies within this network (equal keys included).
    pub fn contains(&self, other: &NetKey) -> bool {
        self.0.contains(&other.0)
    }

    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        self.0.contains(&addr)
    }

    /// Sort key used to order candidate batches: coarsest first.
    pub(crate) fn specificity(&self) -> (u8, Family, u128) {
        (self.prefix_len(), self.family(), self.bits())
    }
}

impl From<IpNet> for NetKey {
    fn from(net: IpNet) -> Self {
        NetKey::new(net)
    }
}

impl fmt::Display for NetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Something with a first and a last address.
pub trait Span {
    fn first(&self) -> IpAddr;
    fn last(&self) -> IpAddr;
}

impl Span for NetKey {
    fn first(&self) -> IpAddr {
        self.0.network()
    }

    fn last(&self) -> IpAddr {
        self.0.broadcast()
    }
}

/// Which kinds of allocation occupy a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub has_prefix: bool,
    pub has_range: bool,
    pub has_address: bool,
}

impl Flags {
    pub fn is_empty(&self) -> bool {
        !(self.has_prefix || self.has_range || self.has_address)
    }

    /// Packed form used by the C ABI.
    pub fn bits(&self) -> u8 {
        let mut b = 0;
        if self.has_prefix {
            b |= FLAG_PREFIX;
        }
        if self.has_range {
            b |= FLAG_RANGE;
        }
        if self.has_address {
            b |= FLAG_ADDRESS;
        }
        b
    }
}

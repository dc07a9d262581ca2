//! Helper functions for bit-level CIDR operations
//!
//! Keys are left-aligned in a `u128`: an IPv4 address occupies the top 32
//! bits, an IPv6 address all 128. Bit 0 is the most significant bit.

use crate::types::Family;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub fn common_prefix_len(key1: u128, key2: u128, max_len: u8) -> u8 {
    if max_len == 0 {
        return 0;
    }
    let diff = (key1 ^ key2) & mask(max_len);
    if diff == 0 {
        return max_len;
    }
    (diff.leading_zeros() as u8).min(max_len)
}

#[inline]
pub fn get_bit(key: u128, index: u8) -> u8 {
    debug_assert!(index <= 127);
    ((key >> (127 - index)) & 1) as u8
}

#[inline]
pub fn mask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 128 {
        !0u128
    } else {
        !(!0u128 >> prefix_len)
    }
}

// Canonicalise a key: zero host bits beyond `plen`.
#[inline(always)]
pub fn canonical(key: u128, plen: u8) -> u128 {
    key & mask(plen)
}

/// Left-aligned key bits of an address, tagged with its family.
#[inline]
pub fn addr_bits(addr: IpAddr) -> (Family, u128) {
    match addr {
        IpAddr::V4(v4) => (Family::V4, (u32::from(v4) as u128) << 96),
        IpAddr::V6(v6) => (Family::V6, u128::from(v6)),
    }
}

/// Inverse of [`addr_bits`]; bits below the family width are ignored.
#[inline]
pub fn bits_addr(family: Family, bits: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from((bits >> 96) as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

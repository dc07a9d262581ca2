//! Textual grammar: prefixes, ranges and bare addresses
//!
//! `10.0.0.0/8` is a prefix, `10.0.0.0-10.0.0.255` a range, anything else
//! must be a single address.

use crate::constants::{PREFIX_DELIMITER, RANGE_DELIMITER};
use crate::errors::Error;
use crate::types::{NetKey, Span};
use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Inclusive address range; both ends share a family and `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpRange {
    from: IpAddr,
    to: IpAddr,
}

impl IpRange {
    pub fn new(from: IpAddr, to: IpAddr) -> Result<Self, Error> {
        let text = format!("{from}{RANGE_DELIMITER}{to}");
        match (from, to) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {}
            _ => return Err(Error::parse(&text, "range endpoints differ in family")),
        }
        if from > to {
            return Err(Error::parse(&text, "range start is above range end"));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> IpAddr {
        self.from
    }

    pub fn to(&self) -> IpAddr {
        self.to
    }

    /// Minimal set of CIDR blocks that exactly covers the range.
    pub fn blocks(&self) -> Result<Vec<NetKey>, Error> {
        let blocks: Vec<NetKey> = match (self.from, self.to) {
            (IpAddr::V4(a), IpAddr::V4(b)) => Ipv4Subnets::new(a, b, 0)
                .map(|n| NetKey::new(IpNet::V4(n)))
                .collect(),
            (IpAddr::V6(a), IpAddr::V6(b)) => Ipv6Subnets::new(a, b, 0)
                .map(|n| NetKey::new(IpNet::V6(n)))
                .collect(),
            _ => Vec::new(),
        };
        if blocks.is_empty() {
            return Err(Error::Decompose(self.to_string()));
        }
        Ok(blocks)
    }
}

impl Span for IpRange {
    fn first(&self) -> IpAddr {
        self.from
    }

    fn last(&self) -> IpAddr {
        self.to
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.from, RANGE_DELIMITER, self.to)
    }
}

impl FromStr for IpRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (a, b) = s
            .split_once(RANGE_DELIMITER)
            .ok_or_else(|| Error::parse(s, "missing range delimiter"))?;
        let from = a.trim().parse::<IpAddr>().map_err(|e| Error::parse(s, e))?;
        let to = b.trim().parse::<IpAddr>().map_err(|e| Error::parse(s, e))?;
        IpRange::new(from, to)
    }
}

/// Which kind of allocation a piece of text names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Prefix,
    Range,
    Address,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Prefix => f.write_str("prefix"),
            Kind::Range => f.write_str("range"),
            Kind::Address => f.write_str("address"),
        }
    }
}

/// A parsed allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Prefix(NetKey),
    Range(IpRange),
    Address(IpAddr),
}

impl Allocation {
    pub fn kind(&self) -> Kind {
        match self {
            Allocation::Prefix(_) => Kind::Prefix,
            Allocation::Range(_) => Kind::Range,
            Allocation::Address(_) => Kind::Address,
        }
    }

    /// Entry identifier: the canonical text of the allocation.
    pub fn id(&self) -> String {
        match self {
            Allocation::Prefix(key) => key.to_string(),
            Allocation::Range(range) => range.to_string(),
            Allocation::Address(addr) => addr.to_string(),
        }
    }

    /// Trie keys the allocation occupies.
    pub fn keys(&self) -> Result<Vec<NetKey>, Error> {
        match self {
            Allocation::Prefix(key) => Ok(vec![*key]),
            Allocation::Range(range) => range.blocks(),
            Allocation::Address(addr) => Ok(vec![NetKey::host(*addr)]),
        }
    }

    pub(crate) fn expect_kind(self, kind: Kind, input: &str) -> Result<Self, Error> {
        if self.kind() == kind {
            Ok(self)
        } else {
            Err(Error::parse(input, format!("expected a {kind}, found a {}", self.kind())))
        }
    }
}

impl FromStr for Allocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.contains(RANGE_DELIMITER) {
            s.parse().map(Allocation::Range)
        } else if s.contains(PREFIX_DELIMITER) {
            s.parse::<IpNet>()
                .map(|net| Allocation::Prefix(NetKey::new(net)))
                .map_err(|e| Error::parse(s, e))
        } else {
            s.parse::<IpAddr>()
                .map(Allocation::Address)
                .map_err(|e| Error::parse(s, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(keys: &[NetKey]) -> Vec<String> {
        keys.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn grammar_dispatch() {
        assert_eq!("10.0.0.0/8".parse::<Allocation>().unwrap().kind(), Kind::Prefix);
        assert_eq!("10.0.0.0-10.0.0.9".parse::<Allocation>().unwrap().kind(), Kind::Range);
        assert_eq!("3000::1".parse::<Allocation>().unwrap().kind(), Kind::Address);
        assert!(matches!("10.0.0/8".parse::<Allocation>(), Err(Error::Parse { .. })));
        assert!(matches!("hello".parse::<Allocation>(), Err(Error::Parse { .. })));
    }

    #[test]
    fn aligned_range_is_one_block() {
        let r: IpRange = "10.0.0.0-10.0.0.255".parse().unwrap();
        assert_eq!(texts(&r.blocks().unwrap()), vec!["10.0.0.0/24"]);
    }

    #[test]
    fn unaligned_range_decomposes_minimally() {
        let r: IpRange = "10.0.0.3-10.0.0.10".parse().unwrap();
        assert_eq!(
            texts(&r.blocks().unwrap()),
            vec!["10.0.0.3/32", "10.0.0.4/30", "10.0.0.8/31", "10.0.0.10/32"]
        );
        let v6: IpRange = "dead:beaf::f-dead:beaf::ffff".parse().unwrap();
        let blocks = v6.blocks().unwrap();
        assert_eq!(blocks.first().unwrap().to_string(), "dead:beaf::f/128");
        assert_eq!(blocks.last().unwrap().to_string(), "dead:beaf::8000/113");
    }

    #[test]
    fn malformed_ranges_are_parse_errors() {
        assert!("10.0.0.9-10.0.0.1".parse::<IpRange>().is_err());
        assert!("10.0.0.1-::1".parse::<IpRange>().is_err());
    }

    #[test]
    fn identifiers_are_canonical() {
        let p: Allocation = "10.0.0.7/24".parse().unwrap();
        assert_eq!(p.id(), "10.0.0.0/24");
        let r: Allocation = " 10.0.0.1 - 10.0.0.2 ".parse().unwrap();
        assert_eq!(r.id(), "10.0.0.1-10.0.0.2");
    }
}

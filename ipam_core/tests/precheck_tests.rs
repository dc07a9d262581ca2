use ipam_core::{
    Allocation, Error, Ipam, IpRange, NetKey, Precheck, Reason, Verdict,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::net::Ipv4Addr;

fn key(s: &str) -> NetKey {
    NetKey::new(s.parse().unwrap())
}

type Snapshot = Vec<(String, Vec<(String, u32)>)>;

fn snapshot(ipam: &Ipam<u32>) -> Snapshot {
    let mut out = Vec::new();
    ipam.walk(|k, rec| {
        out.push((k.to_string(), rec.entries().map(|(id, v)| (id.to_owned(), *v)).collect()));
        true
    });
    out
}

#[test]
fn rejection_names_the_offending_key() {
    let mut ipam = Ipam::new();
    ipam.add_prefix("10.0.0.0/8", 1).unwrap();
    ipam.add_range("10.0.0.0-10.0.0.255", 2).unwrap();

    let mut pre = Precheck::new();
    let alloc: Allocation = "10.0.0.0/25".parse().unwrap();
    assert_eq!(
        pre.addition(ipam.tree(), &alloc).unwrap(),
        Verdict::Rejected(ipam_core::Rejection {
            key: key("10.0.0.0/25"),
            reason: Reason::RangeConflict,
        })
    );

    let alloc: Allocation = "10.0.0.0/8".parse().unwrap();
    match pre.deletion(ipam.tree(), &alloc).unwrap() {
        Verdict::Rejected(r) => {
            assert_eq!(r.key, key("10.0.0.0/24"));
            assert_eq!(r.reason, Reason::Unanchored);
            assert!(matches!(r.into_error("10.0.0.0/8"), Error::Unanchored(_)));
        }
        Verdict::Approved => panic!("orphaning deletion approved"),
    }
}

#[test]
fn scratch_holds_only_the_neighbourhood() {
    let mut ipam = Ipam::new();
    ipam.add_prefix("10.0.0.0/8", 1).unwrap();
    ipam.add_prefix("10.0.0.0/24", 2).unwrap();
    ipam.add_prefix("10.0.1.0/24", 3).unwrap();
    ipam.add_prefix("192.168.0.0/16", 4).unwrap();
    ipam.add_prefix("2001:db8::/32", 5).unwrap();

    let mut pre = Precheck::new();
    let alloc: Allocation = "10.0.0.0/16".parse().unwrap();
    assert!(pre.addition(ipam.tree(), &alloc).unwrap().is_approved());

    let replayed: Vec<String> = pre.scratch().iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(replayed, vec!["10.0.0.0/8", "10.0.0.0/16", "10.0.0.0/24", "10.0.1.0/24"]);
    assert!(pre.scratch().get(&key("10.0.0.0/16")).unwrap().has_prefix());

    // a second run starts from an empty scratch trie
    let alloc: Allocation = "2001:db8:1::/48".parse().unwrap();
    assert!(pre.addition(ipam.tree(), &alloc).unwrap().is_approved());
    assert_eq!(pre.scratch().len(), 2);
}

#[test]
fn precheck_never_touches_the_live_tree() {
    let mut ipam = Ipam::new();
    ipam.add_prefix("10.0.0.0/8", 1).unwrap();
    ipam.add_range("10.0.0.0-10.0.0.255", 2).unwrap();
    let before = snapshot(&ipam);

    for text in ["10.0.0.0/16", "10.0.0.0/24", "10.0.0.7", "10.0.1.0-10.0.1.9", "10.0.0.0/8"] {
        let _ = ipam.precheck_addition(text).unwrap();
        let _ = ipam.precheck_deletion(text).unwrap();
    }
    assert_eq!(snapshot(&ipam), before);
}

#[derive(Debug, Clone)]
enum Op {
    Allocate(String),
    Release(usize),
}

fn v4(low: u16) -> Ipv4Addr {
    Ipv4Addr::from(0x0A00_0000u32 | low as u32)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<u16>(), 12u8..=30)
            .prop_map(|(low, len)| Op::Allocate(format!("{}/{}", v4(low), len))),
        3 => (any::<u16>(), 0u16..600)
            .prop_map(|(a, span)| Op::Allocate(format!("{}-{}", v4(a), v4(a.saturating_add(span))))),
        1 => any::<u16>().prop_map(|a| Op::Allocate(v4(a).to_string())),
        2 => any::<usize>().prop_map(Op::Release),
    ]
}

/// Structural rules every reachable live tree obeys.
fn check_invariants(ipam: &Ipam<u32>) -> Result<(), TestCaseError> {
    let tree = ipam.tree();
    let mut anchors: HashMap<String, NetKey> = HashMap::new();
    let mut ranges: Vec<IpRange> = Vec::new();

    for (k, rec) in tree.iter() {
        prop_assert!(!rec.is_empty(), "empty record stored at {}", k);
        // range flag <=> some entry id uses the range grammar
        let range_like = rec.entries().any(|(id, _)| id.contains('-'));
        prop_assert_eq!(rec.has_range(), range_like, "flag/entry mismatch at {}", k);

        let ancestors = tree.ancestors(&k);
        let under_range = ancestors.iter().any(|a| tree.get(a).is_some_and(|r| r.has_range()));
        let anchor = if rec.has_prefix() {
            Some(k)
        } else {
            ancestors
                .iter()
                .rev()
                .find(|a| tree.get(a).is_some_and(|r| r.has_prefix()))
                .copied()
        };

        if rec.has_prefix() {
            prop_assert!(!under_range, "prefix {} inside range territory", k);
        }
        if rec.has_range() {
            prop_assert!(!under_range, "range block {} nested in another range", k);
            prop_assert!(anchor.is_some(), "range block {} unanchored", k);
            for id in rec.range_ids() {
                let a = anchor.unwrap();
                let prev = *anchors.entry(id.to_owned()).or_insert(a);
                prop_assert_eq!(prev, a, "range {} straddles prefixes", id);
            }
        }
        if rec.has_address() {
            prop_assert!(anchor.is_some(), "address {} unanchored", k);
        }
    }

    for id in anchors.keys() {
        ranges.push(id.parse().unwrap());
    }
    for (i, a) in ranges.iter().enumerate() {
        for b in &ranges[i + 1..] {
            let disjoint = a.to() < b.from() || b.to() < a.from();
            prop_assert!(disjoint, "ranges {} and {} overlap", a, b);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn precheck_predicts_every_mutation(
        seed_slash8 in any::<bool>(),
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let mut ipam: Ipam<u32> = Ipam::new();
        let mut allocated: Vec<String> = Vec::new();
        if seed_slash8 {
            ipam.add_prefix("10.0.0.0/8", 0).unwrap();
            allocated.push("10.0.0.0/8".to_owned());
        }

        for (step, op) in ops.into_iter().enumerate() {
            let before = snapshot(&ipam);
            match op {
                Op::Allocate(text) => {
                    let predicted = ipam.precheck_addition(&text).unwrap();
                    let outcome = ipam.allocate(&text, step as u32);
                    prop_assert_eq!(predicted, outcome.is_ok(), "{}: {:?}", text, outcome);
                    if outcome.is_ok() {
                        allocated.push(text);
                    } else {
                        prop_assert_eq!(snapshot(&ipam), before, "refused {} changed the tree", text);
                    }
                }
                Op::Release(i) => {
                    if allocated.is_empty() {
                        continue;
                    }
                    let text = allocated[i % allocated.len()].clone();
                    let predicted = ipam.precheck_deletion(&text).unwrap();
                    let outcome = ipam.release(&text);
                    prop_assert_eq!(predicted, outcome.is_ok(), "{}: {:?}", text, outcome);
                    if outcome.is_ok() {
                        allocated.retain(|t| *t != text);
                    } else {
                        prop_assert!(matches!(outcome, Err(Error::DeleteRejected(_))));
                        prop_assert_eq!(snapshot(&ipam), before);
                    }
                }
            }
            check_invariants(&ipam)?;
        }
    }

    #[test]
    fn adding_the_same_prefix_twice_is_idempotent(low in any::<u16>(), len in 8u8..=32) {
        let text = format!("{}/{}", v4(low), len);
        let mut ipam: Ipam<u32> = Ipam::new();
        ipam.add_prefix(&text, 7).unwrap();
        let once = snapshot(&ipam);
        ipam.add_prefix(&text, 7).unwrap();
        prop_assert_eq!(snapshot(&ipam), once);
        prop_assert_eq!(ipam.len(), 1);
    }
}

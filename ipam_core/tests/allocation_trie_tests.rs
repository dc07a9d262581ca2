use ipam_core::{AllocationTrie, Family, NetKey};
use proptest::collection::hash_set;
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr};

fn key(s: &str) -> NetKey {
    NetKey::new(s.parse().unwrap())
}

fn addr(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn texts(keys: &[NetKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

#[test]
fn basic_ops() {
    let mut trie = AllocationTrie::new();
    assert!(trie.match_address(addr("192.168.0.1")).is_none());

    assert_eq!(trie.insert(key("192.168.0.1/32"), "host").unwrap(), None);
    assert_eq!(trie.len(), 1);
    assert_eq!(trie.get(&key("192.168.0.1/32")), Some(&"host"));

    assert_eq!(trie.insert(key("192.168.0.1/32"), "again").unwrap(), Some("host"));
    assert_eq!(trie.len(), 1);

    assert_eq!(trie.remove(&key("192.168.0.1/32")), Some("again"));
    assert!(trie.is_empty());
    assert!(trie.match_address(addr("192.168.0.1")).is_none());
}

#[test]
fn absent_keys_are_not_errors() {
    let mut trie: AllocationTrie<u8> = AllocationTrie::new();
    assert_eq!(trie.remove(&key("10.0.0.0/8")), None);
    trie.insert(key("10.0.0.0/24"), 1).unwrap();
    trie.insert(key("10.0.1.0/24"), 2).unwrap();
    // glue node 10.0.0.0/23 exists but stores nothing
    assert_eq!(trie.get(&key("10.0.0.0/23")), None);
    assert_eq!(trie.remove(&key("10.0.0.0/23")), None);
    assert_eq!(trie.len(), 2);
}

#[test]
fn split_creates_balanced_branches() {
    let mut trie = AllocationTrie::new();
    trie.insert(key("128.0.0.0/32"), 1).unwrap();
    trie.insert(key("0.0.0.0/32"), 2).unwrap();

    assert_eq!(trie.match_address(addr("128.0.0.0")).map(|(_, v)| *v), Some(1));
    assert_eq!(trie.match_address(addr("0.0.0.0")).map(|(_, v)| *v), Some(2));

    trie.remove(&key("128.0.0.0/32"));
    assert!(trie.match_address(addr("128.0.0.0")).is_none());
    assert!(trie.match_address(addr("0.0.0.0")).is_some());

    trie.remove(&key("0.0.0.0/32"));
    assert!(trie.is_empty());
    assert_eq!(trie.iter().count(), 0);
}

#[test]
fn insert_above_and_delete_internal_node() {
    let mut trie = AllocationTrie::new();
    trie.insert(key("1.2.3.4/32"), "host").unwrap();
    trie.insert(key("1.2.3.0/24"), "net").unwrap();

    assert_eq!(trie.match_address(addr("1.2.3.4")).unwrap().1, &"host");
    assert_eq!(trie.match_address(addr("1.2.3.5")).unwrap().1, &"net");

    trie.remove(&key("1.2.3.0/24"));
    assert!(trie.match_address(addr("1.2.3.5")).is_none());
    assert_eq!(trie.match_address(addr("1.2.3.4")).unwrap().1, &"host");
}

#[test]
fn families_are_disjoint() {
    let mut trie = AllocationTrie::new();
    trie.insert(key("0.0.0.0/0"), "v4-default").unwrap();
    trie.insert(key("2001:db8::/32"), "doc").unwrap();

    assert_eq!(trie.match_address(addr("2001:db8::1")).unwrap().1, &"doc");
    assert!(trie.match_address(addr("3000::1")).is_none());
    assert_eq!(trie.match_address(addr("8.8.8.8")).unwrap().1, &"v4-default");
    assert!(trie.ancestors(&key("2001:db8::/48")).iter().all(|k| k.family() == Family::V6));
}

#[test]
fn ipv6_host_routes() {
    let mut trie = AllocationTrie::new();
    trie.insert(key("2001:db8::1/128"), 1).unwrap();
    trie.insert(key("2001:db8::/127"), 2).unwrap();
    assert_eq!(trie.match_address(addr("2001:db8::1")).unwrap().0, key("2001:db8::1/128"));
    assert_eq!(trie.match_address(addr("2001:db8::")).unwrap().0, key("2001:db8::/127"));
}

#[test]
fn ancestors_and_descendants() {
    let mut trie = AllocationTrie::new();
    for k in ["10.0.0.0/8", "10.0.0.0/16", "10.0.0.0/24", "10.0.1.0/24", "10.1.0.0/16", "11.0.0.0/8"] {
        trie.insert(key(k), ()).unwrap();
    }

    assert_eq!(texts(&trie.ancestors(&key("10.0.1.0/24"))), vec!["10.0.0.0/8", "10.0.0.0/16"]);
    assert_eq!(texts(&trie.ancestors(&key("10.0.0.0/8"))), Vec::<String>::new());
    // a key need not be stored to have ancestors
    assert_eq!(texts(&trie.ancestors(&key("10.1.2.0/24"))), vec!["10.0.0.0/8", "10.1.0.0/16"]);

    assert_eq!(
        texts(&trie.descendants(&key("10.0.0.0/8"))),
        vec!["10.0.0.0/16", "10.0.0.0/24", "10.0.1.0/24", "10.1.0.0/16"]
    );
    assert_eq!(
        texts(&trie.descendants(&key("10.0.0.0/15"))),
        vec!["10.0.0.0/16", "10.0.0.0/24", "10.0.1.0/24", "10.1.0.0/16"]
    );
    assert!(trie.descendants(&key("10.0.0.0/24")).is_empty());
    assert!(trie.descendants(&key("12.0.0.0/8")).is_empty());
}

#[test]
fn walk_stops_early_and_orders_by_address() {
    let mut trie = AllocationTrie::new();
    for k in ["10.0.1.0/24", "::/0", "10.0.0.0/24", "10.0.0.0/8"] {
        trie.insert(key(k), ()).unwrap();
    }
    let all: Vec<String> = trie.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(all, vec!["10.0.0.0/8", "10.0.0.0/24", "10.0.1.0/24", "::/0"]);

    let mut seen = 0;
    trie.walk(|_, _| {
        seen += 1;
        seen < 2
    });
    assert_eq!(seen, 2);
}

#[test]
fn clear_resets_everything() {
    let mut trie = AllocationTrie::new();
    trie.insert(key("10.0.0.0/8"), 1).unwrap();
    trie.insert(key("::1/128"), 2).unwrap();
    trie.clear();
    assert!(trie.is_empty());
    assert!(trie.match_address(addr("10.1.1.1")).is_none());
    trie.insert(key("10.0.0.0/8"), 3).unwrap();
    assert_eq!(trie.len(), 1);
}

/// Most specific key of `keys` covering `a`, computed the slow way.
fn brute_lpm(keys: &[NetKey], a: IpAddr) -> Option<NetKey> {
    keys.iter()
        .filter(|k| k.contains_addr(a))
        .max_by_key(|k| k.prefix_len())
        .copied()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lpm_matches_brute_force(
        nets in hash_set((any::<u32>(), 0u8..=32), 1..40),
        probes in proptest::collection::vec(any::<u32>(), 16),
    ) {
        let mut trie = AllocationTrie::new();
        let mut keys: Vec<NetKey> = Vec::new();
        for (bits, len) in nets {
            let k = NetKey::from_bits(Family::V4, (bits as u128) << 96, len).unwrap();
            if !keys.contains(&k) {
                keys.push(k);
            }
            trie.insert(k, k).unwrap();
        }
        prop_assert_eq!(trie.len(), keys.len());

        // probe random addresses and the edges of every stored key
        let mut targets: Vec<IpAddr> = probes.into_iter().map(|p| IpAddr::V4(Ipv4Addr::from(p))).collect();
        for k in &keys {
            targets.push(k.net().network());
            targets.push(k.net().broadcast());
        }
        for a in targets {
            let got = trie.match_address(a).map(|(k, v)| { assert_eq!(&k, v); k });
            prop_assert_eq!(got, brute_lpm(&keys, a));
        }

        // ancestors/descendants agree with containment
        for k in &keys {
            let mut anc: Vec<NetKey> = keys.iter().filter(|o| o.prefix_len() < k.prefix_len() && o.contains(k)).copied().collect();
            anc.sort_by_key(|o| o.prefix_len());
            prop_assert_eq!(trie.ancestors(k), anc);
            let mut desc = trie.descendants(k);
            desc.sort();
            let mut want: Vec<NetKey> = keys.iter().filter(|o| o.prefix_len() > k.prefix_len() && k.contains(o)).copied().collect();
            want.sort();
            prop_assert_eq!(desc, want);
        }
    }

    #[test]
    fn property_insert_delete_lookup(
        nets in hash_set((any::<u32>(), 8u8..=32), 3..24),
    ) {
        let keys: Vec<NetKey> = {
            let mut v: Vec<NetKey> = nets
                .into_iter()
                .map(|(bits, len)| NetKey::from_bits(Family::V4, (bits as u128) << 96, len).unwrap())
                .collect();
            v.sort();
            v.dedup();
            v
        };
        let mut trie = AllocationTrie::new();
        for k in &keys {
            trie.insert(*k, ()).unwrap();
        }

        let mid = keys.len() / 2;
        let (to_delete, to_keep) = keys.split_at(mid);
        for k in to_delete {
            prop_assert_eq!(trie.remove(k), Some(()));
        }

        for k in to_delete {
            prop_assert!(trie.get(k).is_none(), "deleted key still present: {}", k);
        }
        for k in to_keep {
            prop_assert!(trie.get(k).is_some(), "kept key missing: {}", k);
        }
        prop_assert_eq!(trie.len(), to_keep.len());
        prop_assert_eq!(trie.iter().count(), to_keep.len());
    }
}

#[test]
fn stress_random_churn() {
    use rand::Rng;

    let mut rng = rand::rng();
    let mut trie = AllocationTrie::new();
    let mut present: Vec<NetKey> = Vec::new();
    for _ in 0..5_000 {
        let k = NetKey::from_bits(
            Family::V6,
            rng.random::<u128>(),
            rng.random_range(16u8..=128),
        )
        .unwrap();
        if rng.random_bool(0.7) {
            if trie.insert(k, ()).unwrap().is_none() {
                present.push(k);
            }
        } else if let Some(idx) = (!present.is_empty()).then(|| rng.random_range(0..present.len())) {
            let victim = present.swap_remove(idx);
            assert_eq!(trie.remove(&victim), Some(()));
        }
        assert_eq!(trie.len(), present.len());
    }
    for k in &present {
        assert!(trie.get(k).is_some());
    }
}

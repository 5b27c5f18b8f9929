#![cfg(test)]

// Property tests for Container kept inside the crate so every step can be
// checked with `validate` and compared key by key against a simple model.

use crate::container::{Container, Handle};
use crate::node::{ContainerNode, LookupKey};
use crate::storage::StorageMode;
use proptest::prelude::*;
use std::collections::BTreeSet;

const KEYS: u8 = 6;

#[derive(Clone, Debug)]
struct Node {
    unique: Vec<u8>,
    shared: Vec<u8>,
    expired: bool,
}

impl ContainerNode for Node {
    type Key = u8;

    fn lookup_keys(&self) -> Vec<LookupKey<u8>> {
        self.unique
            .iter()
            .map(|&k| LookupKey::Unique(k))
            .chain(self.shared.iter().map(|&k| LookupKey::Shared(k)))
            .collect()
    }

    fn has_expired(&self) -> bool {
        self.expired
    }
}

#[derive(Clone, Debug)]
enum Op {
    Add(Vec<u8>, Vec<u8>),
    Remove(usize),
    Rekey(usize, Vec<u8>, Vec<u8>),
    Expire(usize),
    Has(u8, bool),
    Lookup(u8),
}

fn arb_keys() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(0..KEYS, 0..3)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arb_keys(), arb_keys()).prop_map(|(u, s)| Op::Add(u, s)),
        1 => any::<usize>().prop_map(Op::Remove),
        1 => (any::<usize>(), arb_keys(), arb_keys()).prop_map(|(i, u, s)| Op::Rekey(i, u, s)),
        1 => any::<usize>().prop_map(Op::Expire),
        1 => (0..KEYS, any::<bool>()).prop_map(|(k, c)| Op::Has(k, c)),
        1 => (0..KEYS).prop_map(Op::Lookup),
    ]
}

#[derive(Clone, Debug)]
struct Registered {
    unique: Vec<u8>,
    shared: Vec<u8>,
    expired: bool,
}

// Live nodes in insertion order, with the keys they are registered under.
struct Model {
    live: Vec<(Handle, Registered)>,
}

impl Model {
    fn admits(&self, unique: &[u8], shared: &[u8], owner: Option<Handle>) -> bool {
        let all: Vec<u8> = unique.iter().chain(shared).copied().collect();
        let distinct: BTreeSet<u8> = all.iter().copied().collect();
        if distinct.len() != all.len() {
            return false;
        }
        for (_, r) in self.live.iter().filter(|(h, _)| Some(*h) != owner) {
            if unique
                .iter()
                .any(|k| r.unique.contains(k) || r.shared.contains(k))
            {
                return false;
            }
            if shared.iter().any(|k| r.unique.contains(k)) {
                return false;
            }
        }
        true
    }

    fn read(&mut self, k: u8, check_expire: bool) -> bool {
        if let Some(pos) = self.live.iter().position(|(_, r)| r.unique.contains(&k)) {
            if check_expire && self.live[pos].1.expired {
                self.live.remove(pos);
                return false;
            }
            return true;
        }
        self.live.iter().any(|(_, r)| r.shared.contains(&k))
    }

    fn unique_owner(&self, k: u8) -> Option<Handle> {
        self.live
            .iter()
            .find(|(_, r)| r.unique.contains(&k))
            .map(|(h, _)| *h)
    }

    fn group(&self, k: u8) -> BTreeSet<Handle> {
        self.live
            .iter()
            .filter(|(_, r)| r.shared.contains(&k))
            .map(|(h, _)| *h)
            .collect()
    }
}

// Property: state-machine equivalence against the model.
// Invariants exercised across random operation sequences:
// - `add`/`update_keys` admit exactly the key sets the model admits, and a
//   rejection changes nothing.
// - Every key resolves to the node or group the model predicts; emptied
//   groups vanish from the index.
// - Expired nodes are evicted only by checking reads of a unique key.
// - `validate` holds after every step; `len` matches the model, and the
//   ordered discipline preserves insertion order.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ordered in any::<bool>(), ops in proptest::collection::vec(arb_op(), 1..80)) {
        let mode = if ordered { StorageMode::Ordered } else { StorageMode::Unordered };
        let mut sut: Container<Node> = Container::new(mode);
        let mut model = Model { live: Vec::new() };

        for op in ops {
            match op {
                Op::Add(u, s) => {
                    let admitted = model.admits(&u, &s, None);
                    let node = Node { unique: u.clone(), shared: s.clone(), expired: false };
                    match sut.add(node) {
                        Ok(h) => {
                            prop_assert!(admitted);
                            model.live.push((h, Registered { unique: u, shared: s, expired: false }));
                        }
                        Err(e) => {
                            prop_assert!(!admitted);
                            prop_assert_eq!(&e.node().unique, &u);
                        }
                    }
                }
                Op::Remove(i) => {
                    if model.live.is_empty() {
                        continue;
                    }
                    let (h, _) = model.live.remove(i % model.live.len());
                    prop_assert!(sut.remove(h, true).is_ok());
                    prop_assert!(sut.remove(h, true).is_err());
                }
                Op::Rekey(i, u, s) => {
                    if model.live.is_empty() {
                        continue;
                    }
                    let idx = i % model.live.len();
                    let h = model.live[idx].0;
                    let admitted = model.admits(&u, &s, Some(h));
                    let res = sut.modify(h, |n| {
                        n.unique = u.clone();
                        n.shared = s.clone();
                    });
                    prop_assert_eq!(res.is_ok(), admitted);
                    if admitted {
                        model.live[idx].1.unique = u;
                        model.live[idx].1.shared = s;
                    }
                }
                Op::Expire(i) => {
                    if model.live.is_empty() {
                        continue;
                    }
                    let idx = i % model.live.len();
                    let h = model.live[idx].0;
                    sut.node_mut(h).unwrap().expired = true;
                    model.live[idx].1.expired = true;
                }
                Op::Has(k, check) => {
                    let expected = model.read(k, check);
                    prop_assert_eq!(sut.has(&k, check), expected);
                }
                Op::Lookup(k) => {
                    let expected = model.read(k, true);
                    prop_assert_eq!(sut.lookup(&k, true, true).is_some(), expected);
                }
            }

            sut.validate().map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(sut.len(), model.live.len());
            for k in 0..KEYS {
                let owner = model.unique_owner(k);
                let group = model.group(k);
                match sut.resolve(&k) {
                    None => {
                        prop_assert!(owner.is_none() && group.is_empty());
                    }
                    Some(r) => match r.node() {
                        Some(h) => {
                            prop_assert_eq!(Some(h), owner);
                        }
                        None => {
                            let got: BTreeSet<Handle> = r.to_vec().into_iter().collect();
                            prop_assert!(!got.is_empty());
                            prop_assert_eq!(got, group);
                        }
                    },
                }
            }
            if ordered {
                let expected: Vec<Handle> = model.live.iter().map(|(h, _)| *h).collect();
                prop_assert_eq!(sut.get_all(), expected);
            }
        }
    }
}

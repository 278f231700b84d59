#![cfg(test)]

// Property tests for HashTable kept inside the crate so they can check the
// slot-level probe-length bookkeeping directly.

use crate::hash_table::tests::BucketHash;
use crate::hash_table::{HashTable, TableOptions};
use crate::hooks::{KeyHasher, StringHash};
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};

// Keys collide on purpose: only a handful of distinct raw hashes, so every
// run exercises displacement and backward shifting.
#[derive(Clone, Copy, Debug, Default)]
struct Crowded;

impl KeyHasher for Crowded {
    type Key = u32;

    fn hash(&self, key: &u32) -> u32 {
        key % 5
    }

    fn equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u32, i32),
    TryInsert(u32, i32),
    Remove(u32),
    Take(u32),
    Find(u32),
    Clear,
}

fn arb_op(keys: u32) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..keys, any::<i32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => (0..keys, any::<i32>()).prop_map(|(k, v)| Op::TryInsert(k, v)),
        2 => (0..keys).prop_map(Op::Remove),
        1 => (0..keys).prop_map(Op::Take),
        2 => (0..keys).prop_map(Op::Find),
        1 => Just(Op::Clear),
    ]
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Probe lengths equal the distance from each entry's ideal bucket (P1).
// - The last value written for a key is the one found (P2).
// - Removals never strand a displaced entry behind a hole (P5).
// - The destroy hook sees exactly the entries the model discards.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in proptest::collection::vec(arb_op(40), 1..200)) {
        let destroyed = RefCell::new(0usize);
        let hook = |_k: u32, _v: i32| *destroyed.borrow_mut() += 1;
        let mut sut = HashTable::with_destroy(TableOptions::new(4), Crowded, &hook).unwrap();
        let mut model: HashMap<u32, i32> = HashMap::new();
        let mut expect_destroyed = 0usize;

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    sut.insert(k, v).unwrap();
                    if model.insert(k, v).is_some() {
                        expect_destroyed += 1;
                    }
                }
                Op::TryInsert(k, v) => {
                    let res = sut.try_insert(k, v);
                    prop_assert_eq!(res.is_ok(), !model.contains_key(&k));
                    model.entry(k).or_insert(v);
                }
                Op::Remove(k) => {
                    let removed = sut.remove(&k);
                    prop_assert_eq!(removed, model.remove(&k).is_some());
                    if removed {
                        expect_destroyed += 1;
                    }
                }
                Op::Take(k) => {
                    prop_assert_eq!(sut.take(&k), model.remove_entry(&k));
                }
                Op::Find(k) => {
                    prop_assert_eq!(sut.find(&k), model.get(&k));
                }
                Op::Clear => {
                    expect_destroyed += model.len();
                    model.clear();
                    sut.clear();
                }
            }

            sut.assert_invariants();
            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(*destroyed.borrow(), expect_destroyed);
        }

        let seen: BTreeSet<(u32, i32)> = sut.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: BTreeSet<(u32, i32)> = model.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(seen, expected);
        for (k, v) in &model {
            prop_assert_eq!(sut.find(k), Some(v));
        }
    }
}

// Property: stackable tables behave like a map of FIFO queues.
// - `iter_key` yields values oldest first, whatever displacements or
//   resizes happened in between (P3).
// - `remove` pops only the front of the queue.
// - `find` sees the front of the queue.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_stackable_fifo(
        ops in proptest::collection::vec((0u8..3u8, 0u32..24u32, 0u32..6u32), 1..200)
    ) {
        let mut sut: HashTable<(u32, u32), u32, _> =
            HashTable::new(TableOptions::new(4).stackable(true), BucketHash).unwrap();
        let mut model: HashMap<(u32, u32), VecDeque<u32>> = HashMap::new();
        let mut next_value = 0u32;

        for (op, bucket, tag) in ops {
            // A few buckets, a few tags per bucket: same-key stacks share
            // buckets with unrelated keys.
            let key = (bucket % 6, tag % 3);
            match op {
                0 | 1 => {
                    sut.insert(key, next_value).unwrap();
                    model.entry(key).or_default().push_back(next_value);
                    next_value += 1;
                }
                _ => {
                    let removed = sut.remove(&key);
                    let front = model.get_mut(&key).and_then(VecDeque::pop_front);
                    prop_assert_eq!(removed, front.is_some());
                }
            }

            sut.assert_invariants();
            let queue: Vec<u32> = model.get(&key).map(|q| q.iter().copied().collect()).unwrap_or_default();
            let got: Vec<u32> = sut.iter_key(&key).copied().collect();
            prop_assert_eq!(&got, &queue);
            prop_assert_eq!(sut.find(&key), queue.first());
        }

        let total: usize = model.values().map(VecDeque::len).sum();
        prop_assert_eq!(sut.len(), total);
    }
}

// Property: every key inserted before a burst of growth stays reachable
// with its value (P4), and capacity only ever doubles.
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn prop_growth_preserves_contents(keys in proptest::collection::btree_set("[a-z]{1,8}", 1..300)) {
        let mut sut: HashTable<String, usize, _> =
            HashTable::new(TableOptions::new(4), StringHash).unwrap();
        let mut capacity = sut.capacity();
        for (i, k) in keys.iter().enumerate() {
            sut.insert(k.clone(), i).unwrap();
            prop_assert!(sut.capacity() == capacity || sut.capacity() == capacity * 2);
            capacity = sut.capacity();
        }
        sut.assert_invariants();
        for (i, k) in keys.iter().enumerate() {
            prop_assert_eq!(sut.find(k.as_str()), Some(&i));
        }
    }
}

#![cfg(test)]

// Property tests for HashTable kept inside the crate so they can check the
// bucket markers directly.

use crate::chain::Node;
use crate::hash_table::{Cursor, HashTable, InsertError};
use crate::policy::{DuplicatePolicy, Multi, StdEq, Unique};
use crate::pool::FixedPool;
use hashbrown::hash_map::DefaultHashBuilder;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hasher};

type Table<D, S> = HashTable<String, D, S, StdEq, FixedPool<Node<String>>>;

// Pool-indexed operations: indices shrink to earlier keys, and positional
// operations address elements by their rank in iteration order.
#[derive(Clone, Debug)]
enum Op {
    Insert(usize),
    InsertOwned(usize),
    Erase(usize),
    Take(usize),
    EraseAt(usize),
    EraseRange(usize, usize),
    Count(String),
    EqualRange(usize),
    Clear,
    Iterate,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, usize, usize, Vec<Op>)> {
    (
        proptest::collection::vec("[a-z]{0,3}", 1..=6),
        0usize..=8,
        1usize..=8,
    )
        .prop_flat_map(|(pool, capacity, buckets)| {
            let idx = 0..pool.len();
            let query = prop_oneof![
                proptest::sample::select(pool.clone()),
                "[a-z]{0,3}".prop_map(|s| s)
            ];
            let op = prop_oneof![
                4 => idx.clone().prop_map(Op::Insert),
                2 => idx.clone().prop_map(Op::InsertOwned),
                2 => idx.clone().prop_map(Op::Erase),
                1 => idx.clone().prop_map(Op::Take),
                2 => any::<usize>().prop_map(Op::EraseAt),
                1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::EraseRange(a, b)),
                1 => query.prop_map(Op::Count),
                1 => idx.clone().prop_map(Op::EqualRange),
                1 => Just(Op::Clear),
                1 => Just(Op::Iterate),
            ];
            proptest::collection::vec(op, 1..60)
                .prop_map(move |ops| (pool.clone(), capacity, buckets, ops))
        })
}

fn cursors<D, S>(t: &Table<D, S>) -> Vec<Cursor> {
    let mut out = Vec::new();
    let mut c = t.begin();
    while !c.is_end() {
        out.push(c);
        c = t.advance(c);
    }
    out
}

fn forget_one(model: &mut BTreeMap<String, usize>, k: &str) {
    match model.get(k).copied() {
        Some(1) => {
            model.remove(k);
        }
        Some(n) => {
            model.insert(k.to_string(), n - 1);
        }
        None => {}
    }
}

fn check_insert<D: DuplicatePolicy, S: BuildHasher>(
    sut: &Table<D, S>,
    res: Result<(Cursor, bool), InsertError>,
    model: &mut BTreeMap<String, usize>,
    k: String,
    len: usize,
) -> Result<(), TestCaseError> {
    let present = model.get(&k).copied().unwrap_or(0);
    match res {
        Err(InsertError::Full { capacity }) => {
            prop_assert_eq!(capacity, sut.capacity());
            prop_assert_eq!(len, capacity, "Full only when every node is in use");
        }
        Ok((c, inserted)) => {
            prop_assert!(len < sut.capacity());
            prop_assert_eq!(sut.key_at(c), Some(&k));
            if D::ALLOW_DUPLICATES || present == 0 {
                prop_assert!(inserted);
                *model.entry(k).or_insert(0) += 1;
            } else {
                prop_assert!(!inserted, "unique table must return the existing key");
            }
        }
    }
    Ok(())
}

// Property: state-machine equivalence against a counted BTreeMap model.
// Invariants exercised across random operation sequences:
// - Full is reported exactly when len == capacity, before any duplicate check.
// - Unique tables keep one copy per key; multisets count every insert.
// - Erase by key, by cursor and by range remove exactly what the model says,
//   and the returned cursor is the element that followed.
// - Erased cursors never resolve again, even after their slot is reused.
// - Iteration yields every key exactly len() times in total.
// - first/last markers match the occupied span after every op.
fn run<D: DuplicatePolicy, S: BuildHasher>(
    mut sut: Table<D, S>,
    pool: &[String],
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let capacity = sut.capacity();
    let mut model: BTreeMap<String, usize> = BTreeMap::new();
    let mut stale: Vec<Cursor> = Vec::new();

    for op in ops {
        let len: usize = model.values().sum();
        match op {
            Op::Insert(i) => {
                let k = pool[i].clone();
                let res = sut.insert(k.clone());
                check_insert(&sut, res, &mut model, k, len)?;
            }
            Op::InsertOwned(i) => {
                let k = pool[i].clone();
                let res = sut.insert_owned(k.as_str());
                check_insert(&sut, res, &mut model, k, len)?;
            }
            Op::Erase(i) => {
                let k = &pool[i];
                let n = sut.erase(k.as_str());
                prop_assert_eq!(n, model.remove(k).unwrap_or(0));
            }
            Op::Take(i) => {
                let k = &pool[i];
                let got = sut.take(k.as_str());
                let present = model.get(k).copied().unwrap_or(0);
                prop_assert_eq!(got.is_some(), present > 0);
                if let Some(got) = got {
                    prop_assert_eq!(&got, k);
                    forget_one(&mut model, k);
                }
            }
            Op::EraseAt(n) => {
                let cs = cursors(&sut);
                if !cs.is_empty() {
                    let at = n % cs.len();
                    let c = cs[at];
                    let key = sut.key_at(c).cloned();
                    prop_assert!(key.is_some());
                    let next = sut.erase_at(c);
                    match cs.get(at + 1) {
                        Some(&expected) => {
                            prop_assert_eq!(next, expected);
                        }
                        None => {
                            prop_assert!(next.is_end());
                        }
                    }
                    if let Some(key) = key {
                        forget_one(&mut model, &key);
                    }
                    stale.push(c);
                }
            }
            Op::EraseRange(a, b) => {
                let cs = cursors(&sut);
                let (lo, hi) = {
                    let a = a % (cs.len() + 1);
                    let b = b % (cs.len() + 1);
                    (a.min(b), a.max(b))
                };
                let first = cs.get(lo).copied().unwrap_or_else(|| sut.end());
                let last = cs.get(hi).copied().unwrap_or_else(|| sut.end());
                let doomed: Vec<String> = cs[lo..hi]
                    .iter()
                    .filter_map(|&c| sut.key_at(c).cloned())
                    .collect();
                let ret = sut.erase_range(first, last);
                prop_assert_eq!(ret, last);
                for k in &doomed {
                    forget_one(&mut model, k);
                }
                stale.extend_from_slice(&cs[lo..hi]);
            }
            Op::Count(s) => {
                let expected = model.get(&s).copied().unwrap_or(0);
                prop_assert_eq!(sut.count(s.as_str()), expected);
                prop_assert_eq!(sut.contains(s.as_str()), expected > 0);
            }
            Op::EqualRange(i) => {
                let k = &pool[i];
                let (lo, hi) = sut.equal_range(k.as_str());
                let matched: Vec<&String> = sut.range(lo, hi).collect();
                prop_assert_eq!(matched.len(), model.get(k).copied().unwrap_or(0));
                prop_assert!(matched.iter().all(|&x| x == k));
            }
            Op::Clear => {
                stale.extend(cursors(&sut));
                sut.clear();
                model.clear();
            }
            Op::Iterate => {
                let mut seen: BTreeMap<String, usize> = BTreeMap::new();
                for k in sut.iter() {
                    *seen.entry(k.clone()).or_insert(0) += 1;
                }
                prop_assert_eq!(&seen, &model);
            }
        }

        // Post-conditions after each op
        let len: usize = model.values().sum();
        for &c in &stale {
            prop_assert!(sut.key_at(c).is_none(), "erased cursor resolved");
        }
        prop_assert_eq!(sut.len(), len);
        prop_assert_eq!(sut.is_empty(), len == 0);
        prop_assert_eq!(sut.is_full(), len == capacity);
        prop_assert_eq!(sut.available(), capacity - len);
        prop_assert_eq!(sut.iter().count(), len);
        prop_assert!(sut.markers_consistent(), "bucket markers out of date");
    }
    Ok(())
}

// Constant hasher: every key collides into bucket 0.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_set_state_machine((pool, capacity, buckets, ops) in arb_scenario()) {
        let sut: Table<Unique, DefaultHashBuilder> =
            HashTable::with_capacity_and_buckets(capacity, buckets);
        run(sut, &pool, ops)?;
    }

    #[test]
    fn prop_multiset_state_machine((pool, capacity, buckets, ops) in arb_scenario()) {
        let sut: Table<Multi, DefaultHashBuilder> =
            HashTable::with_capacity_and_buckets(capacity, buckets);
        run(sut, &pool, ops)?;
    }

    // Same invariants under worst-case collisions, so equality alone
    // separates keys and duplicate runs share a chain with other keys.
    #[test]
    fn prop_set_state_machine_with_collisions((pool, capacity, buckets, ops) in arb_scenario()) {
        let sut: Table<Unique, ConstBuildHasher> =
            HashTable::with_hasher(capacity, buckets, ConstBuildHasher);
        run(sut, &pool, ops)?;
    }

    #[test]
    fn prop_multiset_state_machine_with_collisions((pool, capacity, buckets, ops) in arb_scenario()) {
        let sut: Table<Multi, ConstBuildHasher> =
            HashTable::with_hasher(capacity, buckets, ConstBuildHasher);
        run(sut, &pool, ops)?;
    }
}

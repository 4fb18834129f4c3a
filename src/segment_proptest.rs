#![cfg(test)]

// Property tests for Segment kept inside the crate so they do not require
// feature gates to access internal modules.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use crate::entry::RefKind;
use crate::segment::Segment;

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys and op lists shrink in length.
#[derive(Clone, Debug)]
enum Op {
    Put(usize, i32),
    PutIfAbsent(usize, i32),
    Remove(usize),
    RemoveIf(usize, i32),
    Replace(usize, i32),
    ReplaceIf(usize, i32, i32),
    Get(usize),
    Purge,
    Clear,
}

fn op_strategy(keys: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..keys, any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
        (0..keys, any::<i32>()).prop_map(|(k, v)| Op::PutIfAbsent(k, v)),
        (0..keys).prop_map(Op::Remove),
        (0..keys, any::<i32>()).prop_map(|(k, v)| Op::RemoveIf(k, v)),
        (0..keys, any::<i32>()).prop_map(|(k, v)| Op::Replace(k, v)),
        (0..keys, any::<i32>(), any::<i32>()).prop_map(|(k, e, v)| Op::ReplaceIf(k, e, v)),
        (0..keys).prop_map(Op::Get),
        Just(Op::Purge),
        Just(Op::Clear),
    ]
}

proptest! {
    // A strong-kind segment behaves exactly like a HashMap<u64, i32> with
    // an exact len, no matter how puts, removes, purges, and restructures
    // interleave. Keys double as hashes so slot collisions after resize
    // are exercised deterministically.
    #[test]
    fn prop_strong_segment_matches_model(
        keys in 2usize..=8,
        ops in proptest::collection::vec(op_strategy(8), 1..200),
    ) {
        let segment: Segment<u64, i32> = Segment::new(2, 0.75, RefKind::Strong);
        let mut model: HashMap<u64, i32> = HashMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    let k = (k % keys) as u64;
                    let prev = segment.put(k, k, Arc::new(v), false);
                    let expected = model.insert(k, v);
                    prop_assert_eq!(prev.as_deref(), expected.as_ref());
                }
                Op::PutIfAbsent(k, v) => {
                    let k = (k % keys) as u64;
                    let prev = segment.put(k, k, Arc::new(v), true);
                    prop_assert_eq!(prev.as_deref(), model.get(&k));
                    model.entry(k).or_insert(v);
                }
                Op::Remove(k) => {
                    let k = (k % keys) as u64;
                    let removed = segment.remove(k, &k);
                    let expected = model.remove(&k);
                    prop_assert_eq!(removed.as_deref(), expected.as_ref());
                }
                Op::RemoveIf(k, expected) => {
                    let k = (k % keys) as u64;
                    let model_hit = model.get(&k) == Some(&expected);
                    prop_assert_eq!(segment.remove_if(k, &k, &expected), model_hit);
                    if model_hit {
                        model.remove(&k);
                    }
                }
                Op::Replace(k, v) => {
                    let k = (k % keys) as u64;
                    let prev = segment.replace(k, &k, Arc::new(v));
                    match model.get_mut(&k) {
                        Some(slot) => {
                            prop_assert_eq!(prev.as_deref(), Some(&*slot));
                            *slot = v;
                        }
                        None => prop_assert!(prev.is_none()),
                    }
                }
                Op::ReplaceIf(k, expected, v) => {
                    let k = (k % keys) as u64;
                    let model_hit = model.get(&k) == Some(&expected);
                    prop_assert_eq!(segment.replace_if(k, &k, &expected, Arc::new(v)), model_hit);
                    if model_hit {
                        model.insert(k, v);
                    }
                }
                Op::Get(k) => {
                    let k = (k % keys) as u64;
                    let got = segment.get(k, &k);
                    prop_assert_eq!(got.as_deref(), model.get(&k));
                }
                Op::Purge => segment.purge(),
                Op::Clear => {
                    segment.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(segment.len(), model.len());
            for (k, v) in model.iter() {
                let got = segment.get(*k, k);
                prop_assert_eq!(got.as_deref(), Some(v));
            }
        }
    }

    // A weak-kind segment tracks the holders: while the caller's Arc is
    // alive the entry is live; after dropping it and purging, the entry is
    // gone and the count reflects exactly the surviving holders.
    #[test]
    fn prop_weak_segment_tracks_holders(
        ops in proptest::collection::vec((0u8..3u8, 0usize..6usize, any::<i32>()), 1..150),
    ) {
        let segment: Segment<u64, i32> = Segment::new(2, 0.75, RefKind::Weak);
        let mut holders: HashMap<u64, Arc<i32>> = HashMap::new();

        for (op, k, v) in ops {
            let k = k as u64;
            match op {
                // Put, keeping the Arc alive.
                0 => {
                    let value = Arc::new(v);
                    segment.put(k, k, Arc::clone(&value), false);
                    holders.insert(k, value);
                }
                // Drop the holder; the entry dies in place.
                1 => {
                    holders.remove(&k);
                }
                // Explicit removal also drops the holder.
                2 => {
                    let removed = segment.remove(k, &k);
                    prop_assert_eq!(
                        removed.as_deref(),
                        holders.get(&k).map(|a| a.as_ref())
                    );
                    holders.remove(&k);
                }
                _ => unreachable!(),
            }

            // Live entries are exactly the held ones, before any purge.
            for (key, value) in holders.iter() {
                let got = segment.get(*key, key);
                prop_assert_eq!(got.as_deref(), Some(value.as_ref()));
            }
        }

        segment.purge();
        prop_assert_eq!(segment.len(), holders.len());
        for (key, value) in holders.iter() {
            let got = segment.get(*key, key);
            prop_assert_eq!(got.as_deref(), Some(value.as_ref()));
        }
    }
}

// SegmentedRefMap unit test suite (consolidated).
//
// Each test documents what behavior is being verified and which invariants
// are assumed or asserted. The core invariants exercised:
// - Roundtrip: after put(k, v), get(k) yields v until removal/collection.
// - Exactness: len() reflects every insert and explicit removal by 1.
// - Reference kinds: Strong keeps values alive; Weak entries die with the
//   last external Arc and vanish after purge_unreferenced().
// - In-place replacement: replace/compare_replace mutate without
//   re-chaining; conditional forms fire only on value equality.
// - Restructure: crossing the per-segment threshold resizes without
//   losing entries, including colliding chains.
use std::sync::Arc;

use segmented_refmap::{Options, RefKind, SegmentedRefMap};

// Test: put/get roundtrip and overwrite semantics.
// Assumes: put returns the previous live value.
// Verifies: second put on a key overwrites and returns the first value.
#[test]
fn put_get_roundtrip_and_overwrite() {
    let m: SegmentedRefMap<String, i32> = SegmentedRefMap::new();
    assert!(m.put("a".to_string(), Arc::new(1)).is_none());
    assert_eq!(m.get("a").as_deref(), Some(&1));

    let prev = m.put("a".to_string(), Arc::new(2));
    assert_eq!(prev.as_deref(), Some(&1));
    assert_eq!(m.get("a").as_deref(), Some(&2));
    assert_eq!(m.len(), 1);
}

// Test: the worked example scenario.
// Assumes: capacity 4, concurrency 2, strong kind.
// Verifies: overwrite keeps len at 2; removal drops it to 1.
#[test]
fn example_scenario() {
    let m = Options::new()
        .capacity(4)
        .concurrency_level(2)
        .kind(RefKind::Strong)
        .build::<String, i32>()
        .unwrap();

    m.put("a".to_string(), Arc::new(1));
    m.put("b".to_string(), Arc::new(2));
    m.put("a".to_string(), Arc::new(3));
    assert_eq!(m.get("a").as_deref(), Some(&3));
    assert_eq!(m.len(), 2);

    assert_eq!(m.remove("b").as_deref(), Some(&2));
    assert!(m.get("b").is_none());
    assert_eq!(m.len(), 1);
}

// Test: put_if_absent idempotence.
// Assumes: an existing live value wins and is returned; the loser's value
// is not stored.
// Verifies: first call returns None, second returns the first value.
#[test]
fn put_if_absent_is_idempotent() {
    let m: SegmentedRefMap<&'static str, i32> = SegmentedRefMap::new();
    assert!(m.put_if_absent("k", Arc::new(1)).is_none());
    assert_eq!(m.put_if_absent("k", Arc::new(2)).as_deref(), Some(&1));
    assert_eq!(m.get("k").as_deref(), Some(&1));
    assert_eq!(m.len(), 1);
}

// Test: remove returns the removed value and adjusts len by exactly 1.
// Assumes: no concurrent mutation.
// Verifies: the one-arg remove's return encoding (prior value, not a
// found/not-found flag).
#[test]
fn remove_returns_removed_value() {
    let m: SegmentedRefMap<String, i32> = SegmentedRefMap::new();
    m.put("x".to_string(), Arc::new(7));
    m.put("y".to_string(), Arc::new(8));
    assert_eq!(m.len(), 2);

    assert_eq!(m.remove("x").as_deref(), Some(&7));
    assert!(m.get("x").is_none());
    assert_eq!(m.len(), 1);

    // Removing an absent key is a no-op.
    assert!(m.remove("x").is_none());
    assert_eq!(m.len(), 1);
}

// Test: two-arg remove fires only on value equality.
#[test]
fn remove_if_requires_expected_value() {
    let m: SegmentedRefMap<&'static str, i32> = SegmentedRefMap::new();
    m.put("k", Arc::new(5));

    assert!(!m.remove_if("k", &6));
    assert_eq!(m.get("k").as_deref(), Some(&5));
    assert_eq!(m.len(), 1);

    assert!(m.remove_if("k", &5));
    assert!(m.get("k").is_none());
    assert_eq!(m.len(), 0);
}

// Test: replace mutates in place only when an entry exists.
// Verifies: replace on an absent key stores nothing.
#[test]
fn replace_only_existing_entries() {
    let m: SegmentedRefMap<&'static str, i32> = SegmentedRefMap::new();
    assert!(m.replace("missing", Arc::new(1)).is_none());
    assert!(m.get("missing").is_none());
    assert_eq!(m.len(), 0);

    m.put("k", Arc::new(1));
    assert_eq!(m.replace("k", Arc::new(2)).as_deref(), Some(&1));
    assert_eq!(m.get("k").as_deref(), Some(&2));
}

// Test: compare_replace succeeds iff the current value equals the
// expectation; a failed compare leaves the value untouched.
#[test]
fn compare_replace_semantics() {
    let m: SegmentedRefMap<&'static str, i32> = SegmentedRefMap::new();
    m.put("k", Arc::new(10));

    assert!(!m.compare_replace("k", &11, Arc::new(20)));
    assert_eq!(m.get("k").as_deref(), Some(&10));

    assert!(m.compare_replace("k", &10, Arc::new(20)));
    assert_eq!(m.get("k").as_deref(), Some(&20));

    assert!(!m.compare_replace("absent", &1, Arc::new(2)));
}

// Test: weak entries die with the last external Arc.
// Assumes: RefKind::Weak stores Weak<V>; purge_unreferenced() sweeps.
// Verifies: get reads absent immediately after the drop; len catches up
// after the purge.
#[test]
fn weak_entries_collect_and_purge() {
    let m: SegmentedRefMap<String, String> = SegmentedRefMap::with_kind(RefKind::Weak);
    let held = Arc::new("held".to_string());
    let dropped = Arc::new("dropped".to_string());

    m.put("held".to_string(), Arc::clone(&held));
    m.put("dropped".to_string(), Arc::clone(&dropped));
    assert_eq!(m.len(), 2);

    drop(dropped);
    assert!(m.get("dropped").is_none());
    assert!(!m.contains_key("dropped"));

    m.purge_unreferenced();
    assert_eq!(m.len(), 1);
    assert_eq!(m.get("held").as_deref().map(String::as_str), Some("held"));
}

// Test: strong entries survive the caller dropping every Arc.
#[test]
fn strong_entries_survive_caller_drop() {
    let m: SegmentedRefMap<&'static str, i32> = SegmentedRefMap::new();
    let v = Arc::new(1);
    m.put("k", Arc::clone(&v));
    drop(v);

    m.purge_unreferenced();
    assert_eq!(m.get("k").as_deref(), Some(&1));
    assert_eq!(m.len(), 1);
}

// Test: putting over a weak-dead entry revives the key.
#[test]
fn put_over_dead_weak_entry() {
    let m: SegmentedRefMap<&'static str, i32> = SegmentedRefMap::with_kind(RefKind::Weak);
    let first = Arc::new(1);
    m.put("k", Arc::clone(&first));
    drop(first);
    assert!(m.get("k").is_none());

    let second = Arc::new(2);
    assert!(m.put("k", Arc::clone(&second)).is_none());
    assert_eq!(m.get("k").as_deref(), Some(&2));
    assert_eq!(m.len(), 1);
}

// Test: resize correctness with a deliberately tiny table.
// Assumes: per-segment threshold = slots * load_factor.
// Verifies: far more entries than the initial capacity stay retrievable.
#[test]
fn growth_preserves_all_entries() {
    let m = Options::new()
        .capacity(2)
        .concurrency_level(1)
        .build::<u64, u64>()
        .unwrap();
    for i in 0..1000u64 {
        m.put(i, Arc::new(i * 3));
    }
    assert_eq!(m.len(), 1000);
    for i in 0..1000u64 {
        assert_eq!(m.get(&i).as_deref(), Some(&(i * 3)));
    }
}

// Test: clear empties every segment; the map is reusable afterwards.
#[test]
fn clear_then_reuse() {
    let m: SegmentedRefMap<u32, u32> = SegmentedRefMap::new();
    for i in 0..100 {
        m.put(i, Arc::new(i));
    }
    m.clear();
    assert_eq!(m.len(), 0);
    assert!(m.is_empty());
    assert!(m.get(&42).is_none());

    m.put(42, Arc::new(7));
    assert_eq!(m.get(&42).as_deref(), Some(&7));
    assert_eq!(m.len(), 1);
}

// Test: evict_if releases exactly the matching live entries.
#[test]
fn evict_if_releases_matching() {
    let m: SegmentedRefMap<u32, u32> = SegmentedRefMap::new();
    for i in 0..50 {
        m.put(i, Arc::new(i));
    }
    let evicted = m.evict_if(|_, v| **v % 2 == 0);
    assert_eq!(evicted, 25);
    assert_eq!(m.len(), 25);
    for i in 0..50 {
        assert_eq!(m.contains_key(&i), i % 2 == 1, "key {i}");
    }
}

// Test: borrowed lookup works (store String, query with &str).
#[test]
fn borrowed_lookup_with_str() {
    let m: SegmentedRefMap<String, i32> = SegmentedRefMap::new();
    m.put("hello".to_string(), Arc::new(1));
    assert!(m.contains_key("hello"));
    assert!(!m.contains_key("world"));
    assert_eq!(m.get("hello").as_deref(), Some(&1));
    assert!(m.remove("hello").is_some());
}

// Test: iteration yields each live entry exactly once and skips dead weak
// entries.
#[test]
fn iteration_skips_dead_entries() {
    let m: SegmentedRefMap<String, i32> = SegmentedRefMap::with_kind(RefKind::Weak);
    let held: Vec<Arc<i32>> = (0..10).map(Arc::new).collect();
    for (i, v) in held.iter().enumerate() {
        m.put(format!("k{i}"), Arc::clone(v));
    }
    let doomed = Arc::new(99);
    m.put("doomed".to_string(), Arc::clone(&doomed));
    drop(doomed);

    let mut seen: Vec<(String, i32)> = m.iter().map(|e| (e.key().clone(), **e.value())).collect();
    seen.sort();
    assert_eq!(seen.len(), 10);
    for (i, (k, v)) in seen.iter().enumerate() {
        assert_eq!(k, &format!("k{i}"));
        assert_eq!(*v, i as i32);
    }
}

// Test: removal during iteration goes through the map and does not disturb
// the per-segment snapshot being walked.
#[test]
fn remove_during_iteration() {
    let m: SegmentedRefMap<u32, u32> = SegmentedRefMap::new();
    for i in 0..20 {
        m.put(i, Arc::new(i));
    }
    for entry in m.iter() {
        if **entry.value() < 10 {
            m.remove(entry.key());
        }
    }
    assert_eq!(m.len(), 10);
    for i in 0..20 {
        assert_eq!(m.contains_key(&i), i >= 10);
    }
}

// Test: heavy hash collisions still resolve by key equality.
// Assumes: a constant hasher forces every key into one segment and slot.
#[test]
fn collision_handling_with_const_hasher() {
    use std::hash::{BuildHasher, Hasher};

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
            0 // force all keys into the same chain
        }
    }

    let m: SegmentedRefMap<String, i32, ConstBuildHasher> =
        SegmentedRefMap::with_hasher(ConstBuildHasher);
    for i in 0..32 {
        m.put(format!("k{i}"), Arc::new(i));
    }
    assert_eq!(m.len(), 32);
    for i in 0..32 {
        assert_eq!(m.get(&format!("k{i}")).as_deref(), Some(&i));
    }
    assert_eq!(m.remove(&"k7".to_string()).as_deref(), Some(&7));
    assert_eq!(m.len(), 31);
    assert!(m.get(&"k7".to_string()).is_none());
    assert_eq!(m.get(&"k8".to_string()).as_deref(), Some(&8));
}

// Test: kind accessor and defaults.
#[test]
fn kind_accessor() {
    let strong: SegmentedRefMap<u8, u8> = SegmentedRefMap::new();
    assert_eq!(strong.kind(), RefKind::Strong);
    let weak: SegmentedRefMap<u8, u8> = SegmentedRefMap::with_kind(RefKind::Weak);
    assert_eq!(weak.kind(), RefKind::Weak);
}

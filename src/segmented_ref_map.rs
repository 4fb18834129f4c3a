//! Public map surface: hash mixing, segment routing, configuration, and
//! iteration.

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::sync::Arc;

use thiserror::Error;

use crate::entry::{EntryCell, Node, RefKind};
use crate::segment::Segment;

pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 16;
pub(crate) const DEFAULT_LOAD_FACTOR: f32 = 0.75;
pub(crate) const DEFAULT_CONCURRENCY_LEVEL: usize = 16;
/// Hard cap on the number of segments.
pub(crate) const MAX_CONCURRENCY_LEVEL: usize = 1 << 16;

/// Invalid configuration passed to [`Options::build`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("load factor must be positive and finite, got {0}")]
    InvalidLoadFactor(f32),
    #[error("concurrency level must be at least 1")]
    InvalidConcurrencyLevel,
}

/// Smallest shift such that `1 << shift` covers `minimum`, capped by
/// `maximum`.
fn calculate_shift(minimum: usize, maximum: usize) -> u32 {
    let mut shift = 0u32;
    let mut value = 1usize;
    while value < minimum && value < maximum {
        value <<= 1;
        shift += 1;
    }
    shift
}

/// splitmix64 finalizer. Applied on top of the configured hasher so both
/// the top bits (segment routing) and low bits (slot selection) are well
/// mixed even for weak native hashes.
#[inline]
fn mix(mut hash: u64) -> u64 {
    hash = (hash ^ (hash >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    hash = (hash ^ (hash >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    hash ^ (hash >> 31)
}

/// A hash map partitioned into independently locked segments, holding
/// values through strong or weak references.
///
/// With [`RefKind::Weak`], a value is reclaimable once every external
/// `Arc<V>` clone is dropped; dead entries are swept opportunistically
/// during mutation and on [`purge_unreferenced`](Self::purge_unreferenced).
/// With [`RefKind::Strong`] (the default), the map keeps values alive until
/// removal or an [`evict_if`](Self::evict_if) sweep.
///
/// All operations may be called concurrently from any number of threads.
/// `len` and iteration are eventually consistent with respect to concurrent
/// mutation.
pub struct SegmentedRefMap<K, V, S = RandomState> {
    segments: Box<[Segment<K, V>]>,
    /// log2 of the segment count; the top `shift` bits of the mixed hash
    /// route to a segment.
    shift: u32,
    hasher: S,
    kind: RefKind,
}

impl<K, V> SegmentedRefMap<K, V>
where
    K: Eq + Hash,
{
    /// Map with default capacity (16), load factor (0.75), concurrency
    /// level (16), and [`RefKind::Strong`].
    pub fn new() -> Self {
        Self::with_parts(
            DEFAULT_INITIAL_CAPACITY,
            DEFAULT_LOAD_FACTOR,
            DEFAULT_CONCURRENCY_LEVEL,
            RefKind::Strong,
            RandomState::new(),
        )
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_parts(
            capacity,
            DEFAULT_LOAD_FACTOR,
            DEFAULT_CONCURRENCY_LEVEL,
            RefKind::Strong,
            RandomState::new(),
        )
    }

    pub fn with_kind(kind: RefKind) -> Self {
        Self::with_parts(
            DEFAULT_INITIAL_CAPACITY,
            DEFAULT_LOAD_FACTOR,
            DEFAULT_CONCURRENCY_LEVEL,
            kind,
            RandomState::new(),
        )
    }
}

impl<K, V> Default for SegmentedRefMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> SegmentedRefMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_parts(
            DEFAULT_INITIAL_CAPACITY,
            DEFAULT_LOAD_FACTOR,
            DEFAULT_CONCURRENCY_LEVEL,
            RefKind::Strong,
            hasher,
        )
    }

    /// Construction from validated parts; [`Options::build`] is the
    /// validating entry point.
    fn with_parts(
        capacity: usize,
        load_factor: f32,
        concurrency_level: usize,
        kind: RefKind,
        hasher: S,
    ) -> Self {
        let shift = calculate_shift(concurrency_level, MAX_CONCURRENCY_LEVEL);
        let segment_count = 1usize << shift;
        // Round the requested capacity up across segments, then up to a
        // power of two per segment.
        let per_segment = (capacity + segment_count - 1) / segment_count;
        let slot_shift = calculate_shift(per_segment, crate::segment::MAX_SEGMENT_SIZE);
        let segments: Vec<Segment<K, V>> = (0..segment_count)
            .map(|_| Segment::new(1usize << slot_shift, load_factor, kind))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            shift,
            hasher,
            kind,
        }
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    fn hash_of<Q>(&self, key: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        mix(self.hasher.hash_one(key))
    }

    fn segment_for(&self, hash: u64) -> &Segment<K, V> {
        let index = if self.shift == 0 {
            0
        } else {
            (hash >> (64 - self.shift)) as usize
        };
        &self.segments[index & (self.segments.len() - 1)]
    }

    /// Current value for `key`, if live.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash_of(key);
        self.segment_for(hash).get(hash, key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).is_some()
    }

    /// Insert or overwrite, returning the previous live value.
    ///
    /// Values travel as `Arc<V>` because with [`RefKind::Weak`] the caller's
    /// clones are what keep the entry alive.
    pub fn put(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_of(&key);
        self.segment_for(hash).put(hash, key, value, false)
    }

    /// Insert only when no live value exists; returns the existing value
    /// otherwise.
    pub fn put_if_absent(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_of(&key);
        self.segment_for(hash).put(hash, key, value, true)
    }

    /// Remove the entry, returning its value if it was live.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash_of(key);
        self.segment_for(hash).remove(hash, key)
    }

    /// Remove only when the current value equals `expected`.
    pub fn remove_if<Q>(&self, key: &Q, expected: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: PartialEq,
    {
        let hash = self.hash_of(key);
        self.segment_for(hash).remove_if(hash, key, expected)
    }

    /// Swap the value of an existing live entry in place, returning the
    /// previous value. Absent or dead entries are left untouched.
    pub fn replace<Q>(&self, key: &Q, value: Arc<V>) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash_of(key);
        self.segment_for(hash).replace(hash, key, value)
    }

    /// Swap only when the current value equals `expected`.
    pub fn compare_replace<Q>(&self, key: &Q, expected: &V, value: Arc<V>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: PartialEq,
    {
        let hash = self.hash_of(key);
        self.segment_for(hash).replace_if(hash, key, expected, value)
    }

    /// Sum of segment counts. Lock-free and eventually consistent.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset every segment to an empty initial-size slot array.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear();
        }
    }

    /// Force a purge-only restructure of every segment, unlinking entries
    /// whose weak payload died and tombstones left by removals. Useful for
    /// read-heavy workloads where mutation would otherwise never sweep.
    pub fn purge_unreferenced(&self) {
        for segment in self.segments.iter() {
            segment.purge();
        }
    }

    /// Release every live entry for which the predicate returns true, then
    /// purge. Returns the number of entries evicted. The predicate runs
    /// under segment locks and must not call back into the map.
    pub fn evict_if<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&K, &Arc<V>) -> bool,
    {
        self.segments
            .iter()
            .map(|segment| segment.evict_if(&mut pred))
            .sum()
    }

    /// Iterate over live entries, segment by segment. Each segment is
    /// visited through a snapshot of its chain heads taken when the
    /// iterator reaches it; entries that die mid-iteration are skipped.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            segments: &self.segments,
            segment_index: 0,
            slots: Vec::new(),
            slot_index: 0,
            cursor: None,
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a SegmentedRefMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = EntryRef<K, V>;
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A live entry observed during iteration. Holds the entry and the value
/// it resolved to at observation time.
pub struct EntryRef<K, V> {
    entry: Arc<EntryCell<K, V>>,
    value: Arc<V>,
}

impl<K, V> EntryRef<K, V> {
    pub fn key(&self) -> &K {
        &self.entry.key
    }

    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    pub fn into_value(self) -> Arc<V> {
        self.value
    }
}

/// Iterator over live entries. See [`SegmentedRefMap::iter`].
pub struct Iter<'a, K, V> {
    segments: &'a [Segment<K, V>],
    segment_index: usize,
    slots: Vec<Option<Arc<Node<K, V>>>>,
    slot_index: usize,
    cursor: Option<Arc<Node<K, V>>>,
}

impl<K, V> Iterator for Iter<'_, K, V> {
    type Item = EntryRef<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.cursor.take() {
                self.cursor = node.next.clone();
                if let Some(value) = node.entry.value() {
                    return Some(EntryRef {
                        entry: Arc::clone(&node.entry),
                        value,
                    });
                }
                continue;
            }
            if self.slot_index < self.slots.len() {
                self.cursor = self.slots[self.slot_index].clone();
                self.slot_index += 1;
                continue;
            }
            if self.segment_index < self.segments.len() {
                self.slots = self.segments[self.segment_index].snapshot();
                self.segment_index += 1;
                self.slot_index = 0;
                continue;
            }
            return None;
        }
    }
}

/// Builder for a [`SegmentedRefMap`] with non-default configuration.
///
/// Validation is fail-fast: [`build`](Options::build) rejects a
/// non-positive or non-finite load factor and a zero concurrency level.
/// The concurrency level is rounded up to a power of two and capped at
/// `1 << 16`.
#[derive(Clone, Debug)]
pub struct Options<S = RandomState> {
    capacity: usize,
    load_factor: f32,
    concurrency_level: usize,
    kind: RefKind,
    hasher: S,
}

impl Options<RandomState> {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            kind: RefKind::Strong,
            hasher: RandomState::new(),
        }
    }
}

impl Default for Options<RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Options<S> {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = load_factor;
        self
    }

    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        self.concurrency_level = concurrency_level;
        self
    }

    pub fn kind(mut self, kind: RefKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn hasher<S2>(self, hasher: S2) -> Options<S2> {
        Options {
            capacity: self.capacity,
            load_factor: self.load_factor,
            concurrency_level: self.concurrency_level,
            kind: self.kind,
            hasher,
        }
    }

    pub fn build<K, V>(self) -> Result<SegmentedRefMap<K, V, S>, ConfigError>
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        if !self.load_factor.is_finite() || self.load_factor <= 0.0 {
            return Err(ConfigError::InvalidLoadFactor(self.load_factor));
        }
        if self.concurrency_level == 0 {
            return Err(ConfigError::InvalidConcurrencyLevel);
        }
        Ok(SegmentedRefMap::with_parts(
            self.capacity,
            self.load_factor,
            self.concurrency_level,
            self.kind,
            self.hasher,
        ))
    }
}

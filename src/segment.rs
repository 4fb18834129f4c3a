//! Lock-striped shards: slot tables, chains, and the restructure pass.
//!
//! Every structural mutation of a segment happens under its table write
//! lock. Readers take the read lock only long enough to clone a chain head
//! `Arc` and then traverse outside it, so user `Eq` code never runs while a
//! segment lock is held on the read path. The slot array is replaced
//! wholesale on restructure; a reader holding an old head sees a consistent,
//! if stale, snapshot until the old chain's `Arc`s drop.

use core::borrow::Borrow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::{Mutex, RwLock};

use crate::entry::{EntryCell, EntryState, Node, RefKind};

/// Hard cap on a single segment's slot array.
pub(crate) const MAX_SEGMENT_SIZE: usize = 1 << 30;

pub(crate) struct Table<K, V> {
    heads: Box<[Option<Arc<Node<K, V>>>]>,
}

impl<K, V> Table<K, V> {
    fn with_slots(slots: usize) -> Self {
        Self {
            heads: empty_heads(slots),
        }
    }

    #[inline]
    fn slot(&self, hash: u64) -> usize {
        // Slot count is a power of two; low bits of the mixed hash.
        (hash as usize) & (self.heads.len() - 1)
    }
}

fn empty_heads<K, V>(slots: usize) -> Box<[Option<Arc<Node<K, V>>>]> {
    let heads: Vec<Option<Arc<Node<K, V>>>> = vec![None; slots];
    heads.into_boxed_slice()
}

fn threshold_for(slots: usize, load_factor: f32) -> usize {
    (slots as f32 * load_factor) as usize
}

/// Walk a chain comparing the stored hash before the key.
fn find_node<'a, K, V, Q>(
    head: &'a Option<Arc<Node<K, V>>>,
    hash: u64,
    key: &Q,
) -> Option<&'a Arc<Node<K, V>>>
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    let mut cursor = head;
    while let Some(node) = cursor {
        if node.hash == hash && node.entry.key.borrow() == key {
            return Some(node);
        }
        cursor = &node.next;
    }
    None
}

/// One shard of the map: an independently resizable slot table, a live-entry
/// count, and a purge queue of explicitly released entries.
pub(crate) struct Segment<K, V> {
    table: RwLock<Table<K, V>>,
    /// Live chained entries. Read lock-free for `len` and fast paths;
    /// eventually consistent under concurrent mutation.
    count: AtomicUsize,
    /// Resize trigger, `slots * load_factor`. Updated only when the slot
    /// array is replaced.
    threshold: AtomicUsize,
    pending: Mutex<Vec<Arc<EntryCell<K, V>>>>,
    pending_len: AtomicUsize,
    initial_slots: usize,
    load_factor: f32,
    kind: RefKind,
}

impl<K, V> Segment<K, V> {
    pub(crate) fn new(initial_slots: usize, load_factor: f32, kind: RefKind) -> Self {
        debug_assert!(initial_slots.is_power_of_two());
        Self {
            table: RwLock::new(Table::with_slots(initial_slots)),
            count: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threshold_for(initial_slots, load_factor)),
            pending: Mutex::new(Vec::new()),
            pending_len: AtomicUsize::new(0),
            initial_slots,
            load_factor,
            kind,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Clone the chain head for `hash` under a momentary read lock.
    fn chain_head(&self, hash: u64) -> Option<Arc<Node<K, V>>> {
        let table = self.table.read();
        table.heads[table.slot(hash)].clone()
    }

    /// Snapshot every chain head; iteration walks the snapshot outside any
    /// lock.
    pub(crate) fn snapshot(&self) -> Vec<Option<Arc<Node<K, V>>>> {
        self.table.read().heads.to_vec()
    }

    fn enqueue_purge(&self, entry: Arc<EntryCell<K, V>>) {
        let mut pending = self.pending.lock();
        pending.push(entry);
        self.pending_len.store(pending.len(), Ordering::Release);
    }

    pub(crate) fn get<Q>(&self, hash: u64, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.restructure_if_necessary(false);
        let mut cursor = self.chain_head(hash);
        while let Some(node) = cursor {
            if node.hash == hash && node.entry.key.borrow() == key {
                return node.entry.value();
            }
            cursor = node.next.clone();
        }
        None
    }

    pub(crate) fn put(&self, hash: u64, key: K, value: Arc<V>, only_if_absent: bool) -> Option<Arc<V>>
    where
        K: Eq,
    {
        self.restructure_if_necessary(false);
        let previous = self.put_under_lock(hash, key, value, only_if_absent);
        self.restructure_if_necessary(true);
        previous
    }

    fn put_under_lock(&self, hash: u64, key: K, value: Arc<V>, only_if_absent: bool) -> Option<Arc<V>>
    where
        K: Eq,
    {
        let mut table = self.table.write();
        let idx = table.slot(hash);
        if let Some(node) = find_node(&table.heads[idx], hash, &key).map(Arc::clone) {
            match node.entry.state() {
                // A released entry may sit in the purge queue; re-arming it
                // would let the purge pass unlink a live value. Chain a
                // fresh node instead and let the tombstone get swept.
                EntryState::Released => {}
                EntryState::Live if only_if_absent => {
                    if let Some(current) = node.entry.value() {
                        return Some(current);
                    }
                    // The weak payload died between state() and value();
                    // logically absent, so overwrite.
                    return node.entry.store(self.kind, value);
                }
                // A collected cell is logically absent but still counted;
                // re-arming it in place keeps the count exact.
                EntryState::Live | EntryState::Collected => {
                    return node.entry.store(self.kind, value);
                }
            }
        }
        let entry = Arc::new(EntryCell::new(key, self.kind, value));
        let next = table.heads[idx].take();
        table.heads[idx] = Some(Arc::new(Node { hash, entry, next }));
        self.count.fetch_add(1, Ordering::Release);
        None
    }

    pub(crate) fn remove<Q>(&self, hash: u64, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        // Empty segment: skip the locate entirely.
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        self.restructure_if_necessary(false);
        let table = self.table.write();
        let idx = table.slot(hash);
        let node = find_node(&table.heads[idx], hash, key).map(Arc::clone)?;
        let old = node.entry.release()?;
        self.enqueue_purge(Arc::clone(&node.entry));
        self.count.fetch_sub(1, Ordering::Release);
        Some(old)
    }

    pub(crate) fn remove_if<Q>(&self, hash: u64, key: &Q, expected: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        V: PartialEq,
    {
        if self.count.load(Ordering::Acquire) == 0 {
            return false;
        }
        self.restructure_if_necessary(false);
        let table = self.table.write();
        let idx = table.slot(hash);
        let Some(node) = find_node(&table.heads[idx], hash, key).map(Arc::clone) else {
            return false;
        };
        if node.entry.release_if(expected) {
            self.enqueue_purge(Arc::clone(&node.entry));
            self.count.fetch_sub(1, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// In-place value swap; no node is minted and the chain is untouched.
    pub(crate) fn replace<Q>(&self, hash: u64, key: &Q, value: Arc<V>) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let table = self.table.write();
        let idx = table.slot(hash);
        let node = find_node(&table.heads[idx], hash, key).map(Arc::clone)?;
        node.entry.update(self.kind, value)
    }

    pub(crate) fn replace_if<Q>(&self, hash: u64, key: &Q, expected: &V, value: Arc<V>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        V: PartialEq,
    {
        let table = self.table.write();
        let idx = table.slot(hash);
        match find_node(&table.heads[idx], hash, key) {
            Some(node) => node.entry.update_if(self.kind, expected, value),
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        let mut table = self.table.write();
        table.heads = empty_heads(self.initial_slots);
        self.threshold.store(
            threshold_for(self.initial_slots, self.load_factor),
            Ordering::Release,
        );
        self.count.store(0, Ordering::Release);
        let mut pending = self.pending.lock();
        pending.clear();
        self.pending_len.store(0, Ordering::Release);
    }

    /// Release every live entry matching the predicate, then purge. The
    /// predicate runs under the segment lock and must not call back into
    /// the map.
    pub(crate) fn evict_if<F>(&self, pred: &mut F) -> usize
    where
        F: FnMut(&K, &Arc<V>) -> bool,
    {
        let evicted = {
            let table = self.table.write();
            let mut evicted = 0usize;
            for head in table.heads.iter() {
                let mut cursor = head.clone();
                while let Some(node) = cursor {
                    cursor = node.next.clone();
                    if let Some(value) = node.entry.value() {
                        if pred(&node.entry.key, &value) && node.entry.release().is_some() {
                            self.enqueue_purge(Arc::clone(&node.entry));
                            self.count.fetch_sub(1, Ordering::Release);
                            evicted += 1;
                        }
                    }
                }
            }
            evicted
        };
        if evicted > 0 {
            self.restructure(false);
        }
        evicted
    }

    /// Forced purge-only pass, regardless of queue state.
    pub(crate) fn purge(&self) {
        self.restructure(false);
    }

    /// Restructure when the purge queue is non-empty, or when resizing is
    /// permitted and the count crossed the threshold.
    pub(crate) fn restructure_if_necessary(&self, allow_resize: bool) {
        let count = self.count.load(Ordering::Acquire);
        let needs_resize = count > 0 && count >= self.threshold.load(Ordering::Acquire);
        if self.pending_len.load(Ordering::Acquire) != 0 || (allow_resize && needs_resize) {
            self.restructure(allow_resize);
        }
    }

    fn restructure(&self, allow_resize: bool) {
        let mut table = self.table.write();

        let drained = {
            let mut pending = self.pending.lock();
            self.pending_len.store(0, Ordering::Release);
            core::mem::take(&mut *pending)
        };
        let purged: HashSet<*const EntryCell<K, V>> = drained.iter().map(Arc::as_ptr).collect();

        // Explicitly released entries are already uncounted, so the current
        // count is the projected post-purge count for the resize decision.
        let count = self.count.load(Ordering::Acquire);
        let old_slots = table.heads.len();
        let needs_resize = count > 0 && count >= self.threshold.load(Ordering::Acquire);
        let new_slots = if allow_resize && needs_resize && old_slots < MAX_SEGMENT_SIZE {
            old_slots * 2
        } else {
            old_slots
        };

        let mut heads = empty_heads(new_slots);
        let mut collected = 0usize;
        for head in table.heads.iter() {
            let mut cursor = head.clone();
            while let Some(node) = cursor {
                cursor = node.next.clone();
                if purged.contains(&Arc::as_ptr(&node.entry)) {
                    continue;
                }
                match node.entry.state() {
                    EntryState::Released => continue,
                    EntryState::Collected => {
                        collected += 1;
                        continue;
                    }
                    EntryState::Live => {}
                }
                // Re-link by the stored hash; the key is never re-hashed.
                let idx = (node.hash as usize) & (new_slots - 1);
                let next = heads[idx].take();
                heads[idx] = Some(Arc::new(Node {
                    hash: node.hash,
                    entry: Arc::clone(&node.entry),
                    next,
                }));
            }
        }

        table.heads = heads;
        if new_slots != old_slots {
            self.threshold
                .store(threshold_for(new_slots, self.load_factor), Ordering::Release);
        }
        if collected > 0 {
            // Floor at zero; each weak-dead entry leaves the count once.
            let _ = self
                .count
                .fetch_update(Ordering::Release, Ordering::Acquire, |c| {
                    Some(c.saturating_sub(collected))
                });
        }
    }
}

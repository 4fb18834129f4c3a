//! Reference-wrapped entries and the chain nodes that carry them.
//!
//! An `EntryCell` owns an immutable key and a replaceable value cell; the
//! cell holds the value through a strong or weak reference, or a `Released`
//! tombstone once the entry has been explicitly removed. `Node`s form the
//! per-slot singly linked chains and are immutable once published: a
//! restructure pass re-links by minting fresh nodes around the same
//! `Arc<EntryCell>`, so in-place value updates survive re-chaining.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// How the map holds on to stored values.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RefKind {
    /// The map keeps values alive until explicit removal or eviction.
    #[default]
    Strong,
    /// The map holds `Weak<V>`; a value becomes reclaimable once every
    /// external `Arc` clone has been dropped.
    Weak,
}

/// Entry liveness as observed by lookups and restructure passes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum EntryState {
    Live,
    /// Weak payload whose last external `Arc` was dropped. Not yet
    /// subtracted from the segment count; the next purge pass does that.
    Collected,
    /// Explicitly removed or evicted. Already uncounted; awaiting unlink.
    Released,
}

enum Payload<V> {
    Strong(Arc<V>),
    Weak(Weak<V>),
    Released,
}

impl<V> Payload<V> {
    fn new(kind: RefKind, value: Arc<V>) -> Self {
        match kind {
            RefKind::Strong => Payload::Strong(value),
            RefKind::Weak => Payload::Weak(Arc::downgrade(&value)),
        }
    }

    fn resolve(&self) -> Option<Arc<V>> {
        match self {
            Payload::Strong(value) => Some(Arc::clone(value)),
            Payload::Weak(weak) => weak.upgrade(),
            Payload::Released => None,
        }
    }
}

/// Immutable key plus a replaceable value cell.
///
/// The cell's lock is held only for the enum swap and an `Arc`
/// clone/upgrade; no user code ever runs under it.
pub(crate) struct EntryCell<K, V> {
    pub(crate) key: K,
    payload: RwLock<Payload<V>>,
}

impl<K, V> EntryCell<K, V> {
    pub(crate) fn new(key: K, kind: RefKind, value: Arc<V>) -> Self {
        Self {
            key,
            payload: RwLock::new(Payload::new(kind, value)),
        }
    }

    /// Current value, if the entry is live.
    pub(crate) fn value(&self) -> Option<Arc<V>> {
        self.payload.read().resolve()
    }

    pub(crate) fn state(&self) -> EntryState {
        match &*self.payload.read() {
            Payload::Strong(_) => EntryState::Live,
            Payload::Weak(weak) => {
                if weak.strong_count() > 0 {
                    EntryState::Live
                } else {
                    EntryState::Collected
                }
            }
            Payload::Released => EntryState::Released,
        }
    }

    /// Overwrite the value unconditionally (put path). Re-arms a cell whose
    /// weak payload died; returns the previous live value, if any.
    pub(crate) fn store(&self, kind: RefKind, value: Arc<V>) -> Option<Arc<V>> {
        let mut payload = self.payload.write();
        let old = payload.resolve();
        *payload = Payload::new(kind, value);
        old
    }

    /// Swap the value only when the entry is currently live (replace path).
    pub(crate) fn update(&self, kind: RefKind, value: Arc<V>) -> Option<Arc<V>> {
        let mut payload = self.payload.write();
        let old = payload.resolve()?;
        *payload = Payload::new(kind, value);
        Some(old)
    }

    /// Swap the value only when the current value equals `expected`.
    pub(crate) fn update_if(&self, kind: RefKind, expected: &V, value: Arc<V>) -> bool
    where
        V: PartialEq,
    {
        let mut payload = self.payload.write();
        match payload.resolve() {
            Some(current) if *current == *expected => {
                *payload = Payload::new(kind, value);
                true
            }
            _ => false,
        }
    }

    /// Tombstone a live entry, returning its value. A cell that is already
    /// released, or whose weak payload died, is left untouched: the purge
    /// pass owns that transition and its count accounting.
    pub(crate) fn release(&self) -> Option<Arc<V>> {
        let mut payload = self.payload.write();
        let old = payload.resolve()?;
        *payload = Payload::Released;
        Some(old)
    }

    /// Tombstone only when the current value equals `expected`.
    pub(crate) fn release_if(&self, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let mut payload = self.payload.write();
        match payload.resolve() {
            Some(current) if *current == *expected => {
                *payload = Payload::Released;
                true
            }
            _ => false,
        }
    }
}

/// One link in a slot's hash chain. Immutable once published; readers that
/// cloned an old head keep walking a consistent, if stale, chain.
pub(crate) struct Node<K, V> {
    /// Mixed hash as stored at insert time; restructure re-links by this
    /// value and never re-hashes the key.
    pub(crate) hash: u64,
    pub(crate) entry: Arc<EntryCell<K, V>>,
    pub(crate) next: Option<Arc<Node<K, V>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: a strong cell stays live until released; release returns
    /// the stored value exactly once.
    #[test]
    fn strong_cell_lifecycle() {
        let cell = EntryCell::new("k", RefKind::Strong, Arc::new(7));
        assert_eq!(cell.state(), EntryState::Live);
        assert_eq!(cell.value().as_deref(), Some(&7));

        assert_eq!(cell.release().as_deref(), Some(&7));
        assert_eq!(cell.state(), EntryState::Released);
        assert!(cell.value().is_none());
        assert!(cell.release().is_none(), "second release is a no-op");
    }

    /// Invariant: a weak cell reads as collected once the last external Arc
    /// is dropped, and release leaves it in `Collected`, not `Released`.
    #[test]
    fn weak_cell_collects_when_last_arc_drops() {
        let value = Arc::new(String::from("v"));
        let cell = EntryCell::new(1u32, RefKind::Weak, Arc::clone(&value));
        assert_eq!(cell.state(), EntryState::Live);
        assert_eq!(cell.value().as_deref().map(String::as_str), Some("v"));

        drop(value);
        assert_eq!(cell.state(), EntryState::Collected);
        assert!(cell.value().is_none());
        assert!(cell.release().is_none());
        assert_eq!(
            cell.state(),
            EntryState::Collected,
            "release must not hide a collected cell from the purge pass"
        );
    }

    /// Invariant: `store` re-arms a dead weak cell; `update` does not.
    #[test]
    fn store_rearms_dead_cell_but_update_does_not() {
        let first = Arc::new(1);
        let cell = EntryCell::new((), RefKind::Weak, Arc::clone(&first));
        drop(first);

        assert!(cell.update(RefKind::Weak, Arc::new(2)).is_none());
        assert_eq!(cell.state(), EntryState::Collected);

        let second = Arc::new(3);
        assert!(cell.store(RefKind::Weak, Arc::clone(&second)).is_none());
        assert_eq!(cell.state(), EntryState::Live);
        assert_eq!(cell.value().as_deref(), Some(&3));
        drop(second);
    }

    /// Invariant: conditional update/release fire only on value equality.
    #[test]
    fn conditional_update_and_release() {
        let cell = EntryCell::new("k", RefKind::Strong, Arc::new(10));

        assert!(!cell.update_if(RefKind::Strong, &11, Arc::new(20)));
        assert_eq!(cell.value().as_deref(), Some(&10));

        assert!(cell.update_if(RefKind::Strong, &10, Arc::new(20)));
        assert_eq!(cell.value().as_deref(), Some(&20));

        assert!(!cell.release_if(&10));
        assert_eq!(cell.state(), EntryState::Live);
        assert!(cell.release_if(&20));
        assert_eq!(cell.state(), EntryState::Released);
    }
}

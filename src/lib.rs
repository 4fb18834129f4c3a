//! segmented-refmap: a concurrent hash map split into lock-striped
//! segments whose entries hold values through strong or weak references,
//! purging dead entries opportunistically.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: build SegmentedRefMap in safe, verifiable layers so each piece
//!   can be reasoned about independently.
//! - Layers:
//!   - entry: the reference abstraction. `EntryCell` pairs an immutable
//!     key with a replaceable value cell (`Arc<V>` for strong, `Weak<V>`
//!     for weak, `Released` once removed); `Node` is one immutable link in
//!     a slot's singly linked chain, carrying a precomputed hash.
//!   - segment: one shard — a power-of-two slot array of chain heads
//!     behind a write lock, an atomic live-entry count, a resize threshold,
//!     and a purge queue of released entries. Restructure drains the
//!     queue, decides whether to double the slot array, and rebuilds every
//!     chain, dropping released and weak-dead entries.
//!   - SegmentedRefMap: the public API. Mixes the configured hasher's
//!     output through a splitmix64 finalizer, routes by the top bits to a
//!     segment, and delegates.
//!
//! Constraints
//! - Thread-safe: any number of threads may call any operation; the map is
//!   `Send + Sync` when `K` and `V` are.
//! - Structural mutation of a segment is serialized by that segment's
//!   write lock; slot arrays are replaced wholesale, never mutated in
//!   place, so a reader holding an old chain head sees a consistent,
//!   possibly stale, snapshot.
//! - Lookups never hold a segment lock while probing: they clone the chain
//!   head `Arc` under a momentary read lock and compare keys outside it.
//!   `len` is a lock-free sum of segment counts and is only eventually
//!   consistent, as is iteration.
//! - Each entry stores its mixed `u64` hash; restructure re-links by the
//!   stored hash and never re-invokes `K: Hash`.
//! - Write-path callbacks (`K: Eq` probing, `evict_if` predicates) run
//!   under the segment lock and must not call back into the map.
//!
//! Why this split?
//! - Localize invariants: the value cell owns liveness transitions, the
//!   segment owns count accounting and chain structure, the map owns
//!   routing and configuration.
//! - No unsafe: chains are `Arc`-linked and immutable once published;
//!   reclamation is `Arc` drops rather than epoch machinery.
//!
//! Reclamation model
//! - `RefKind::Weak` stores `Weak<V>`; the caller's `Arc` clones keep the
//!   value alive, and the entry reads as absent once they are gone. There
//!   is no collector notification: dead weak entries are discovered by
//!   failed upgrades during restructure passes, while explicit removals
//!   and evictions feed the per-segment purge queue directly.
//! - `RefKind::Strong` stores `Arc<V>`: the map keeps values alive until
//!   `remove`, `clear`, or an `evict_if` sweep.
//!
//! Notes and non-goals
//! - No ordering across segments; no snapshot isolation for `len`/`iter`.
//! - Values move in and out as `Arc<V>`; with a weak map a by-value `V`
//!   would be dead on arrival.
//! - Keys are immutable post-insert; values are replaced in place without
//!   re-chaining (`replace`, `compare_replace`).
//! - Public surface is `SegmentedRefMap`, its iterator types, `RefKind`,
//!   and the `Options` builder; lower layers are implementation details.

mod entry;
mod segment;
mod segmented_ref_map;
mod segment_proptest;

// Public surface
pub use entry::RefKind;
pub use segmented_ref_map::{ConfigError, EntryRef, Iter, Options, SegmentedRefMap};

//! pool-hashset: fixed-capacity hash sets and multisets whose elements
//! live in a preallocated node pool and are chained through intrusive
//! links.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a hash table that never allocates after construction and whose
//!   element positions stay valid while other elements come and go.
//! - Layers:
//!   - Pool: fixed-capacity slot storage handing out generational
//!     `NodeKey`s. `FixedPool` is the default, backed by a `SlotMap`.
//!   - Chain: an intrusive singly-linked list threaded through pooled
//!     nodes. It stores only its head; every operation is "after a
//!     position", with `Position::BeforeBegin` standing for the head.
//!   - BucketArray: one chain per bucket plus `first`/`last` markers
//!     bounding the occupied span.
//!   - HashTable<K, D, S, E, P>: the engine. `D` selects unique or
//!     duplicate keys; `PoolHashSet` and `PoolHashMultiSet` are aliases.
//!
//! Constraints
//! - Capacity and bucket count are fixed. No rehashing, no growth.
//! - Inserting into a full table fails with `InsertError::Full` and leaves
//!   the table unchanged.
//! - Bucket index is `hash % bucket_count`. Lookups never leave the key's
//!   bucket.
//! - Equal keys of a multiset stay contiguous within their bucket.
//! - Not thread-safe; callers provide mutual exclusion. Tables are `Send`
//!   when their keys, hasher and pool are.
//!
//! Cursors
//! - A `Cursor` names a bucket and a node key. Erasing one element never
//!   invalidates cursors to other elements. A cursor whose element was
//!   erased is stale: reading yields `None` because the generational key
//!   no longer resolves, even after the slot is reused.
//! - Mutating through a stale cursor is a caller bug and trips a debug
//!   assertion.
//!
//! Reentrancy
//! - Public methods that run `Hash` or `KeyEq` hold a debug-only guard.
//!   A callback that reenters the same table panics in debug builds
//!   instead of observing half-linked chains.
//!
//! Marker maintenance
//! - Inserts widen the `first`/`last` span in O(1).
//! - Emptying the first bucket scans forward to the next occupied one;
//!   emptying the last bucket scans backward, never past `first`.
//!   Iteration starts at `first` and stops after `last`.

mod buckets;
pub mod chain;
pub mod hash_table;
mod hash_table_proptest;
pub mod policy;
pub mod pool;
mod reentrancy;

// Public surface
pub use chain::{Chain, Link, Node, Position};
pub use hash_table::{
    BucketIter, Cursor, HashTable, InsertError, Iter, PoolHashMultiSet, PoolHashSet, Range,
};
pub use policy::{DuplicatePolicy, KeyEq, Multi, StdEq, Unique};
pub use pool::{FixedPool, NodeKey, Pool};

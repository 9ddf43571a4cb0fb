//! HashTable: fixed-capacity chained hash table over a node pool.
//!
//! One engine serves sets and multisets; the `DuplicatePolicy` parameter
//! decides what `insert` does with an equal key. Keys live in pooled nodes
//! linked into per-bucket chains, so inserting never moves existing nodes
//! and a `Cursor` stays valid until its own element is erased.

use crate::buckets::BucketArray;
use crate::chain::{ChainIter, Link, Node, Position};
use crate::policy::{DuplicatePolicy, KeyEq, Multi, StdEq, Unique};
use crate::pool::{FixedPool, NodeKey, Pool};
use crate::reentrancy::ReentrancyCheck;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash, Hasher};
use core::iter::FusedIterator;
use core::marker::PhantomData;
use hashbrown::hash_map::DefaultHashBuilder;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum InsertError {
    /// Every node of the pool is in use.
    #[error("hash table is full ({capacity} elements)")]
    Full { capacity: usize },
}

/// Position of an element in a table, or the end position.
///
/// Cursors compare by element identity; every end cursor equals every
/// other end cursor. A cursor whose element was erased is stale: reading
/// through it yields `None`, erasing through it is a caller bug.
#[derive(Copy, Clone, Debug)]
pub struct Cursor {
    bucket: usize,
    node: Option<NodeKey>,
}

impl Cursor {
    #[inline]
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }

    /// Bucket index of the element. For the end cursor this is the last
    /// occupied bucket at the time the cursor was produced.
    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn key<'a, K, D, S, E, P>(&self, table: &'a HashTable<K, D, S, E, P>) -> Option<&'a K>
    where
        P: Pool<Item = Node<K>>,
    {
        table.key_at(*self)
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for Cursor {}

impl Hash for Cursor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

#[inline]
fn key_matches<K, Q, P, E>(pool: &P, key_eq: &E, node: NodeKey, q: &Q) -> bool
where
    P: Pool<Item = Node<K>>,
    K: Borrow<Q>,
    Q: ?Sized,
    E: KeyEq<Q>,
{
    pool.get(node)
        .is_some_and(|n| KeyEq::eq(key_eq, n.key().borrow(), q))
}

/// Cursor following `c`: the next node of its chain, else the head of the
/// next occupied bucket, else the end.
fn step<K, P>(pool: &P, buckets: &BucketArray, c: Cursor) -> Cursor
where
    P: Pool<Item = Node<K>>,
{
    let Some(k) = c.node else {
        return c;
    };
    debug_assert!(pool.get(k).is_some(), "advancing a stale cursor");
    if let Some(next) = pool.get(k).and_then(Link::next) {
        return Cursor {
            bucket: c.bucket,
            node: Some(next),
        };
    }
    match buckets.next_occupied(c.bucket) {
        Some(i) => Cursor {
            bucket: i,
            node: buckets.chain(i).begin(),
        },
        None => Cursor {
            bucket: buckets.last(),
            node: None,
        },
    }
}

/// Structural state. Kept apart from the reentrancy check so that public
/// methods can hold the guard while mutating.
struct Core<S, E, P> {
    pool: P,
    buckets: BucketArray,
    hasher: S,
    key_eq: E,
}

impl<K, S, E, P> Core<S, E, P>
where
    P: Pool<Item = Node<K>>,
{
    fn end(&self) -> Cursor {
        Cursor {
            bucket: self.buckets.last(),
            node: None,
        }
    }

    fn begin(&self) -> Cursor {
        if self.pool.is_empty() {
            return self.end();
        }
        let first = self.buckets.first();
        Cursor {
            bucket: first,
            node: self.buckets.chain(first).begin(),
        }
    }

    fn key_at(&self, c: Cursor) -> Option<&K> {
        self.pool.get(c.node?).map(Node::key)
    }

    /// Position in `bucket` whose successor is `target`.
    fn predecessor(&self, bucket: usize, target: NodeKey) -> Option<Position> {
        if bucket >= self.buckets.len() {
            return None;
        }
        let chain = self.buckets.chain(bucket);
        let mut prev = Position::BeforeBegin;
        loop {
            match chain.next_of(&self.pool, prev) {
                Some(k) if k == target => return Some(prev),
                Some(k) => prev = Position::Node(k),
                None => return None,
            }
        }
    }

    /// First match for `q` in `bucket` and its predecessor. Without a match
    /// the position is the chain's tail.
    fn scan<Q>(&self, bucket: usize, q: &Q) -> (Position, Option<NodeKey>)
    where
        K: Borrow<Q>,
        Q: ?Sized,
        E: KeyEq<Q>,
    {
        let chain = self.buckets.chain(bucket);
        let mut prev = Position::BeforeBegin;
        while let Some(k) = chain.next_of(&self.pool, prev) {
            if key_matches(&self.pool, &self.key_eq, k, q) {
                return (prev, Some(k));
            }
            prev = Position::Node(k);
        }
        (prev, None)
    }

    /// Where a key equal to `q` goes: after the run of equal keys, or at the
    /// tail. With duplicates disallowed an existing match is returned as
    /// `Err`.
    fn insertion_point<Q>(
        &self,
        bucket: usize,
        q: &Q,
        allow_dups: bool,
    ) -> Result<Position, NodeKey>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        E: KeyEq<Q>,
    {
        let chain = self.buckets.chain(bucket);
        let mut prev = Position::BeforeBegin;
        let mut in_run = false;
        while let Some(k) = chain.next_of(&self.pool, prev) {
            if key_matches(&self.pool, &self.key_eq, k, q) {
                if !allow_dups {
                    return Err(k);
                }
                in_run = true;
            } else if in_run {
                break;
            }
            prev = Position::Node(k);
        }
        Ok(prev)
    }

    fn check_room(&self) -> Result<(), InsertError> {
        if self.pool.is_full() {
            let capacity = self.pool.capacity();
            log::debug!("insert rejected: all {} nodes in use", capacity);
            return Err(InsertError::Full { capacity });
        }
        Ok(())
    }

    fn link_new(&mut self, bucket: usize, at: Position, key: K) -> Result<Cursor, InsertError> {
        let capacity = self.pool.capacity();
        let node = self
            .pool
            .allocate(Node::new(key))
            .map_err(|_| InsertError::Full { capacity })?;
        let Core { pool, buckets, .. } = self;
        buckets.chain_mut(bucket).insert_after(pool, at, node);
        buckets.note_insert(bucket, pool.len());
        Ok(Cursor {
            bucket,
            node: Some(node),
        })
    }

    fn clear(&mut self) -> usize {
        let n = self.pool.len();
        self.buckets.reset();
        self.pool.release_all();
        n
    }

    fn erase_at(&mut self, c: Cursor) -> Cursor {
        let Some(target) = c.node else {
            debug_assert!(false, "erase_at called with the end cursor");
            return self.end();
        };
        let Some(prev) = self.predecessor(c.bucket, target) else {
            debug_assert!(false, "erase_at called with a stale cursor");
            return self.end();
        };
        let next = step(&self.pool, &self.buckets, c);

        let Core { pool, buckets, .. } = self;
        buckets.chain_mut(c.bucket).erase_after(pool, prev);
        pool.release(target);
        buckets.repair_after_erase(c.bucket, pool.len());

        if next.is_end() {
            self.end()
        } else {
            next
        }
    }

    fn erase_range(&mut self, first: Cursor, last: Cursor) -> Cursor {
        if first == last {
            return if last.is_end() { self.end() } else { last };
        }
        if first == self.begin() && last.is_end() {
            let n = self.clear();
            log::debug!("range erase covered the whole table ({} elements)", n);
            return self.end();
        }
        let Some(start) = first.node else {
            debug_assert!(false, "range starts at the end cursor");
            return self.end();
        };
        let Some(mut prev) = self.predecessor(first.bucket, start) else {
            debug_assert!(false, "range starts at a stale cursor");
            return self.end();
        };

        let Core { pool, buckets, .. } = self;
        let mut bucket = first.bucket;
        loop {
            let until = match last.node {
                Some(k) if last.bucket == bucket => Some(k),
                _ => None,
            };
            buckets
                .chain_mut(bucket)
                .erase_after_until(pool, prev, until, |pool, k| {
                    pool.release(k);
                });
            buckets.repair_after_erase(bucket, pool.len());
            if until.is_some() {
                break;
            }
            match buckets.next_occupied(bucket) {
                Some(next) => {
                    bucket = next;
                    prev = Position::BeforeBegin;
                }
                None => break,
            }
        }

        if last.is_end() {
            self.end()
        } else {
            last
        }
    }
}

impl<K, S, E, P> Core<S, E, P>
where
    P: Pool<Item = Node<K>>,
    S: BuildHasher,
{
    #[inline]
    fn bucket_of<Q>(&self, q: &Q) -> usize
    where
        Q: ?Sized + Hash,
    {
        self.buckets.index_for(self.hasher.hash_one(q))
    }

    fn find<Q>(&self, q: &Q) -> Cursor
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let bucket = self.bucket_of(q);
        match self.scan(bucket, q) {
            (_, Some(k)) => Cursor {
                bucket,
                node: Some(k),
            },
            (_, None) => self.end(),
        }
    }

    fn count<Q>(&self, q: &Q, all: bool) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let bucket = self.bucket_of(q);
        if !all {
            return usize::from(self.scan(bucket, q).1.is_some());
        }
        self.buckets
            .chain(bucket)
            .iter(&self.pool)
            .filter(|&k| key_matches(&self.pool, &self.key_eq, k, q))
            .count()
    }

    fn equal_range<Q>(&self, q: &Q, all: bool) -> (Cursor, Cursor)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let first = self.find(q);
        if first.is_end() {
            return (first, first);
        }
        let mut last = step(&self.pool, &self.buckets, first);
        if all {
            while let Some(k) = last.node {
                if !key_matches(&self.pool, &self.key_eq, k, q) {
                    break;
                }
                last = step(&self.pool, &self.buckets, last);
            }
        }
        (first, last)
    }

    fn insert(&mut self, key: K, allow_dups: bool) -> Result<(Cursor, bool), InsertError>
    where
        K: Hash,
        E: KeyEq<K>,
    {
        self.check_room()?;
        let bucket = self.bucket_of(&key);
        match self.insertion_point(bucket, &key, allow_dups) {
            Err(existing) => Ok((
                Cursor {
                    bucket,
                    node: Some(existing),
                },
                false,
            )),
            Ok(at) => self.link_new(bucket, at, key).map(|c| (c, true)),
        }
    }

    fn insert_owned<Q>(&mut self, q: &Q, allow_dups: bool) -> Result<(Cursor, bool), InsertError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + ToOwned<Owned = K>,
        E: KeyEq<Q>,
    {
        self.check_room()?;
        let bucket = self.bucket_of(q);
        match self.insertion_point(bucket, q, allow_dups) {
            Err(existing) => Ok((
                Cursor {
                    bucket,
                    node: Some(existing),
                },
                false,
            )),
            Ok(at) => self.link_new(bucket, at, q.to_owned()).map(|c| (c, true)),
        }
    }

    fn erase<Q>(&mut self, q: &Q, all: bool) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let bucket = self.bucket_of(q);
        let Core {
            pool,
            buckets,
            key_eq,
            ..
        } = self;
        let chain = buckets.chain_mut(bucket);
        let mut prev = Position::BeforeBegin;
        let mut n = 0;
        while let Some(k) = chain.next_of(&*pool, prev) {
            if key_matches(&*pool, &*key_eq, k, q) {
                chain.erase_after(pool, prev);
                pool.release(k);
                n += 1;
                if !all {
                    break;
                }
            } else {
                prev = Position::Node(k);
            }
        }
        if n > 0 {
            buckets.repair_after_erase(bucket, pool.len());
        }
        n
    }

    fn take<Q>(&mut self, q: &Q) -> Option<K>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let bucket = self.bucket_of(q);
        let (prev, hit) = self.scan(bucket, q);
        let hit = hit?;
        let Core { pool, buckets, .. } = self;
        buckets.chain_mut(bucket).erase_after(pool, prev);
        let node = pool.release(hit);
        buckets.repair_after_erase(bucket, pool.len());
        node.map(Node::into_key)
    }
}

/// Fixed-capacity hash table over pooled, intrusively chained nodes.
///
/// - `D`: duplicate policy (`Unique` or `Multi`).
/// - `S`: hasher builder; bucket index is `hash % bucket_count`.
/// - `E`: key equality predicate, consistent with `S`.
/// - `P`: node pool; the table owns it exclusively.
///
/// Capacity and bucket count are fixed at construction. The only
/// recoverable failure is `InsertError::Full`.
pub struct HashTable<K, D = Unique, S = DefaultHashBuilder, E = StdEq, P = FixedPool<Node<K>>> {
    core: Core<S, E, P>,
    reentrancy: ReentrancyCheck,
    _policy: PhantomData<fn() -> (K, D)>,
}

/// Set with unique keys.
pub type PoolHashSet<K, S = DefaultHashBuilder, E = StdEq> = HashTable<K, Unique, S, E>;

/// Set that keeps every inserted key, duplicates included.
pub type PoolHashMultiSet<K, S = DefaultHashBuilder, E = StdEq> = HashTable<K, Multi, S, E>;

impl<K, D> HashTable<K, D> {
    /// Table holding up to `capacity` keys, with one bucket per key slot.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_buckets(capacity, capacity.max(1))
    }

    pub fn with_capacity_and_buckets(capacity: usize, bucket_count: usize) -> Self {
        Self::with_hasher(capacity, bucket_count, DefaultHashBuilder::default())
    }
}

impl<K, D, S> HashTable<K, D, S> {
    pub fn with_hasher(capacity: usize, bucket_count: usize, hasher: S) -> Self {
        Self::with_hasher_and_eq(capacity, bucket_count, hasher, StdEq)
    }
}

impl<K, D, S, E> HashTable<K, D, S, E> {
    pub fn with_hasher_and_eq(capacity: usize, bucket_count: usize, hasher: S, key_eq: E) -> Self {
        Self::with_pool(FixedPool::new(capacity), bucket_count, hasher, key_eq)
    }
}

impl<K, D, S, E, P> HashTable<K, D, S, E, P>
where
    P: Pool<Item = Node<K>>,
{
    /// Build a table over a caller-supplied pool. The table takes sole
    /// ownership of the pool and starts empty; items already in the pool
    /// are dropped.
    ///
    /// Panics if `bucket_count` is zero.
    pub fn with_pool(mut pool: P, bucket_count: usize, hasher: S, key_eq: E) -> Self {
        let buckets = BucketArray::new(bucket_count);
        if !pool.is_empty() {
            log::debug!("dropping {} items left in the supplied pool", pool.len());
            pool.release_all();
        }
        Self {
            core: Core {
                pool,
                buckets,
                hasher,
                key_eq,
            },
            reentrancy: ReentrancyCheck::new(),
            _policy: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.core.pool.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.core.pool.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.core.pool.is_full()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.core.pool.capacity()
    }

    /// Remaining free nodes.
    #[inline]
    pub fn available(&self) -> usize {
        self.core.pool.available()
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.core.buckets.len()
    }

    /// `len / bucket_count`. Informational only; the table never rehashes.
    pub fn load_factor(&self) -> f32 {
        self.len() as f32 / self.bucket_count() as f32
    }

    pub fn hasher(&self) -> &S {
        &self.core.hasher
    }

    pub fn key_eq(&self) -> &E {
        &self.core.key_eq
    }

    /// Lowest and highest occupied bucket indices; `(0, 0)` when empty.
    pub fn bucket_span(&self) -> (usize, usize) {
        (self.core.buckets.first(), self.core.buckets.last())
    }

    /// Number of keys in bucket `index`, found by walking its chain.
    ///
    /// Panics if `index >= bucket_count()`.
    pub fn bucket_len(&self, index: usize) -> usize {
        self.core.buckets.chain(index).len(&self.core.pool)
    }

    /// Keys of bucket `index` in chain order.
    ///
    /// Panics if `index >= bucket_count()`.
    pub fn bucket_iter(&self, index: usize) -> BucketIter<'_, K, P> {
        BucketIter {
            pool: &self.core.pool,
            inner: self.core.buckets.chain(index).iter(&self.core.pool),
            _pd: PhantomData,
        }
    }

    pub fn begin(&self) -> Cursor {
        self.core.begin()
    }

    pub fn end(&self) -> Cursor {
        self.core.end()
    }

    /// Cursor following `c`. The end cursor stays at the end.
    pub fn advance(&self, c: Cursor) -> Cursor {
        step(&self.core.pool, &self.core.buckets, c)
    }

    /// Key at `c`; `None` for the end cursor or a stale cursor.
    pub fn key_at(&self, c: Cursor) -> Option<&K> {
        self.core.key_at(c)
    }

    /// Iterate every key, bucket by bucket, starting at the first occupied
    /// bucket.
    pub fn iter(&self) -> Iter<'_, K, P> {
        Iter {
            range: self.range(self.begin(), self.end()),
            remaining: self.len(),
        }
    }

    /// Keys from `first` up to, not including, `last`.
    pub fn range(&self, first: Cursor, last: Cursor) -> Range<'_, K, P> {
        Range {
            pool: &self.core.pool,
            buckets: &self.core.buckets,
            cur: first,
            end: last,
            _pd: PhantomData,
        }
    }

    /// Drop every key, clear every chain and release the whole pool at once.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter();
        let n = self.core.clear();
        log::debug!("cleared {} elements", n);
    }

    /// Erase the element at `c` and return the cursor following it.
    ///
    /// Finding the in-bucket predecessor costs O(bucket length). Passing the
    /// end cursor or a stale cursor is a caller bug: it panics in debug
    /// builds and returns `end()` without changes otherwise.
    pub fn erase_at(&mut self, c: Cursor) -> Cursor {
        let _g = self.reentrancy.enter();
        self.core.erase_at(c)
    }

    /// Erase `[first, last)` and return `last`. `last` must be reachable
    /// from `first`; each bucket is relinked once.
    pub fn erase_range(&mut self, first: Cursor, last: Cursor) -> Cursor {
        let _g = self.reentrancy.enter();
        self.core.erase_range(first, last)
    }
}

impl<K, D, S, E, P> HashTable<K, D, S, E, P>
where
    D: DuplicatePolicy,
    S: BuildHasher,
    P: Pool<Item = Node<K>>,
{
    /// Insert `key`.
    ///
    /// Returns the element's cursor and whether a node was added. With
    /// unique keys an equal key already present is returned with `false`
    /// and nothing is allocated. Fails with `Full` when no node is free,
    /// leaving the table unchanged.
    pub fn insert(&mut self, key: K) -> Result<(Cursor, bool), InsertError>
    where
        K: Hash,
        E: KeyEq<K>,
    {
        let _g = self.reentrancy.enter();
        self.core.insert(key, D::ALLOW_DUPLICATES)
    }

    /// Like `insert`, but builds the owned key from `q` only when it will be
    /// stored.
    pub fn insert_owned<Q>(&mut self, q: &Q) -> Result<(Cursor, bool), InsertError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + ToOwned<Owned = K>,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        self.core.insert_owned(q, D::ALLOW_DUPLICATES)
    }

    /// Insert every key of `iter`, stopping at the first failure. Keys
    /// inserted before the failure stay.
    pub fn try_extend<I>(&mut self, iter: I) -> Result<(), InsertError>
    where
        I: IntoIterator<Item = K>,
        K: Hash,
        E: KeyEq<K>,
    {
        let _g = self.reentrancy.enter();
        for key in iter {
            self.core.insert(key, D::ALLOW_DUPLICATES)?;
        }
        Ok(())
    }

    /// Replace the contents with the keys of `iter`.
    pub fn assign<I>(&mut self, iter: I) -> Result<(), InsertError>
    where
        I: IntoIterator<Item = K>,
        K: Hash,
        E: KeyEq<K>,
    {
        let _g = self.reentrancy.enter();
        self.core.clear();
        for key in iter {
            self.core.insert(key, D::ALLOW_DUPLICATES)?;
        }
        Ok(())
    }

    /// Cursor to the first key equal to `q`, or `end()`.
    pub fn find<Q>(&self, q: &Q) -> Cursor
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        self.core.find(q)
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&K>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        let c = self.core.find(q);
        self.core.key_at(c)
    }

    pub fn contains<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        !self.core.find(q).is_end()
    }

    /// Number of keys equal to `q` (0 or 1 with unique keys).
    pub fn count<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        self.core.count(q, D::ALLOW_DUPLICATES)
    }

    /// `[first match, first non-match)`; `(end, end)` when absent.
    pub fn equal_range<Q>(&self, q: &Q) -> (Cursor, Cursor)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        self.core.equal_range(q, D::ALLOW_DUPLICATES)
    }

    /// Bucket index `q` hashes to.
    pub fn bucket<Q>(&self, q: &Q) -> usize
    where
        Q: ?Sized + Hash,
    {
        let _g = self.reentrancy.enter();
        self.core.bucket_of(q)
    }

    /// Erase every key equal to `q` (at most one with unique keys) and
    /// return how many were removed.
    pub fn erase<Q>(&mut self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        self.core.erase(q, D::ALLOW_DUPLICATES)
    }

    /// Remove the first key equal to `q` and hand it back.
    pub fn take<Q>(&mut self, q: &Q) -> Option<K>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let _g = self.reentrancy.enter();
        self.core.take(q)
    }
}

#[cfg(test)]
impl<K, D, S, E, P> HashTable<K, D, S, E, P>
where
    P: Pool<Item = Node<K>>,
{
    pub(crate) fn markers_consistent(&self) -> bool {
        self.core.buckets.markers_consistent()
    }
}

impl<K, D, S, E> Clone for HashTable<K, D, S, E>
where
    K: Clone,
    S: Clone,
    E: Clone,
{
    /// Copy into a fresh pool of the same capacity, keeping the bucket
    /// layout and intra-bucket order.
    fn clone(&self) -> Self {
        let mut out = Self::with_hasher_and_eq(
            self.capacity(),
            self.bucket_count(),
            self.core.hasher.clone(),
            self.core.key_eq.clone(),
        );
        if self.is_empty() {
            return out;
        }
        let (first, last) = self.bucket_span();
        for bucket in first..=last {
            let mut at = Position::BeforeBegin;
            for k in self.core.buckets.chain(bucket).iter(&self.core.pool) {
                let Some(src) = self.core.pool.get(k) else {
                    continue;
                };
                let Ok(node) = out.core.pool.allocate(Node::new(src.key().clone())) else {
                    debug_assert!(false, "clone target has the same capacity");
                    return out;
                };
                let Core { pool, buckets, .. } = &mut out.core;
                buckets.chain_mut(bucket).insert_after(pool, at, node);
                buckets.note_insert(bucket, pool.len());
                at = Position::Node(node);
            }
        }
        out
    }
}

impl<K, D, S, E, P> PartialEq for HashTable<K, D, S, E, P>
where
    K: Hash,
    D: DuplicatePolicy,
    S: BuildHasher,
    E: KeyEq<K>,
    P: Pool<Item = Node<K>>,
{
    /// Equal when both hold the same keys with the same multiplicities,
    /// regardless of bucket layout.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|k| {
                self.core.count(k, D::ALLOW_DUPLICATES) == other.core.count(k, D::ALLOW_DUPLICATES)
            })
    }
}

impl<K, D, S, E, P> Eq for HashTable<K, D, S, E, P>
where
    K: Hash,
    D: DuplicatePolicy,
    S: BuildHasher,
    E: KeyEq<K>,
    P: Pool<Item = Node<K>>,
{
}

impl<K, D, S, E, P> core::fmt::Debug for HashTable<K, D, S, E, P>
where
    K: core::fmt::Debug,
    P: Pool<Item = Node<K>>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, K, D, S, E, P> IntoIterator for &'a HashTable<K, D, S, E, P>
where
    P: Pool<Item = Node<K>>,
{
    type Item = &'a K;
    type IntoIter = Iter<'a, K, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Keys between two cursors, in table order.
pub struct Range<'a, K, P> {
    pool: &'a P,
    buckets: &'a BucketArray,
    cur: Cursor,
    end: Cursor,
    _pd: PhantomData<&'a K>,
}

impl<'a, K: 'a, P> Iterator for Range<'a, K, P>
where
    P: Pool<Item = Node<K>>,
{
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        if self.cur == self.end {
            return None;
        }
        let pool = self.pool;
        let key = pool.get(self.cur.node?)?.key();
        self.cur = step(pool, self.buckets, self.cur);
        Some(key)
    }
}

impl<'a, K: 'a, P> FusedIterator for Range<'a, K, P> where P: Pool<Item = Node<K>> {}

/// Iterator over every key of a table.
pub struct Iter<'a, K, P> {
    range: Range<'a, K, P>,
    remaining: usize,
}

impl<'a, K: 'a, P> Iterator for Iter<'a, K, P>
where
    P: Pool<Item = Node<K>>,
{
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        let key = self.range.next()?;
        self.remaining -= 1;
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K: 'a, P> ExactSizeIterator for Iter<'a, K, P> where P: Pool<Item = Node<K>> {}

impl<'a, K: 'a, P> FusedIterator for Iter<'a, K, P> where P: Pool<Item = Node<K>> {}

/// Keys of a single bucket.
pub struct BucketIter<'a, K, P> {
    pool: &'a P,
    inner: ChainIter<'a, P>,
    _pd: PhantomData<&'a K>,
}

impl<'a, K: 'a, P> Iterator for BucketIter<'a, K, P>
where
    P: Pool<Item = Node<K>>,
{
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        let pool = self.pool;
        let k = self.inner.next()?;
        pool.get(k).map(Node::key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    /// Hashes integers to themselves so bucket placement is predictable.
    #[derive(Clone, Default)]
    struct IdentityBuildHasher;
    #[derive(Default)]
    struct IdentityHasher(u64);
    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }
    impl Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = self.0.rotate_left(8) ^ u64::from(b);
            }
        }
        fn write_u32(&mut self, n: u32) {
            self.0 = u64::from(n);
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    // Every key lands in bucket 0.
    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> ConstHasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        }
    }

    type Set = PoolHashSet<u32, IdentityBuildHasher>;
    type MultiSet = PoolHashMultiSet<u32, IdentityBuildHasher>;

    fn set(capacity: usize, buckets: usize) -> Set {
        Set::with_hasher(capacity, buckets, IdentityBuildHasher)
    }

    fn multiset(capacity: usize, buckets: usize) -> MultiSet {
        MultiSet::with_hasher(capacity, buckets, IdentityBuildHasher)
    }

    fn sorted<'a>(it: impl Iterator<Item = &'a u32>) -> Vec<u32> {
        let mut v: Vec<u32> = it.copied().collect();
        v.sort_unstable();
        v
    }

    /// Invariant: capacity 4, two buckets, keys split by parity; the fifth
    /// insert fails with Full and nothing changes.
    #[test]
    fn capacity_scenario() {
        let mut s = set(4, 2);
        for k in [1, 2, 3, 4] {
            let (_, inserted) = s.insert(k).unwrap();
            assert!(inserted);
        }
        assert_eq!(s.bucket_iter(1).copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(s.bucket_iter(0).copied().collect::<Vec<_>>(), vec![2, 4]);
        assert!(s.is_full());
        assert_eq!(s.insert(5), Err(InsertError::Full { capacity: 4 }));
        assert_eq!(s.len(), 4);

        assert_eq!(s.erase(&2), 1);
        assert!(s.find(&2).is_end());
        assert_eq!(s.len(), 3);
        assert_eq!(sorted(s.iter()), vec![1, 3, 4]);
        assert!(s.markers_consistent());
    }

    /// Invariant: a full table rejects even keys it already holds; the pool
    /// is checked before the chain is scanned.
    #[test]
    fn full_is_reported_before_duplicate_check() {
        let mut s = set(1, 1);
        s.insert(7).unwrap();
        assert_eq!(s.insert(7), Err(InsertError::Full { capacity: 1 }));
    }

    /// Invariant: unique policy returns the existing element without
    /// allocating; multi policy stores both.
    #[test]
    fn duplicate_policy() {
        let mut s = set(4, 4);
        let (c1, first) = s.insert(9).unwrap();
        let (c2, second) = s.insert(9).unwrap();
        assert!(first && !second);
        assert_eq!(c1, c2);
        assert_eq!(s.len(), 1);
        assert_eq!(s.count(&9), 1);

        let mut m = multiset(4, 4);
        let (d1, _) = m.insert(9).unwrap();
        let (d2, inserted) = m.insert(9).unwrap();
        assert!(inserted);
        assert_ne!(d1, d2);
        assert_eq!(m.len(), 2);
        assert_eq!(m.count(&9), 2);
    }

    /// Invariant: equal keys stay contiguous in their bucket; a new duplicate
    /// goes after the existing run, not at the tail.
    #[test]
    fn duplicates_are_contiguous() {
        let mut m = PoolHashMultiSet::<u32, ConstBuildHasher>::with_hasher(8, 1, ConstBuildHasher);
        for k in [1, 2, 3, 1, 2, 1] {
            m.insert(k).unwrap();
        }
        let order: Vec<u32> = m.bucket_iter(0).copied().collect();
        assert_eq!(order, vec![1, 1, 1, 2, 2, 3]);

        let (lo, hi) = m.equal_range(&2);
        assert_eq!(m.range(lo, hi).copied().collect::<Vec<_>>(), vec![2, 2]);
        assert_eq!(m.key_at(hi), Some(&3));
    }

    #[test]
    fn equal_range_unique_and_missing() {
        let mut s = set(4, 4);
        s.insert(1).unwrap();
        s.insert(5).unwrap();
        let (lo, hi) = s.equal_range(&1);
        assert_eq!(s.range(lo, hi).count(), 1);
        assert_eq!(s.key_at(lo), Some(&1));

        let (lo, hi) = s.equal_range(&3);
        assert!(lo.is_end() && hi.is_end());
    }

    /// Invariant: multiset erase by key removes every match and reports the
    /// count; markers follow.
    #[test]
    fn multiset_erase_all_matches() {
        let mut m = multiset(8, 4);
        for k in [4, 4, 8, 1, 4] {
            m.insert(k).unwrap();
        }
        assert_eq!(m.erase(&4), 3);
        assert_eq!(m.count(&4), 0);
        assert_eq!(m.len(), 2);
        assert_eq!(sorted(m.iter()), vec![1, 8]);
        assert_eq!(m.erase(&4), 0);
        assert!(m.markers_consistent());
    }

    /// Invariant: erase_at returns the following element and iteration
    /// still visits everything else exactly once.
    #[test]
    fn erase_at_returns_next() {
        let mut s = set(8, 4);
        for k in [0, 4, 1, 3] {
            s.insert(k).unwrap();
        }
        // bucket 0: [0, 4], bucket 1: [1], bucket 3: [3]
        let c = s.find(&4);
        let next = s.erase_at(c);
        assert_eq!(s.key_at(next), Some(&1));
        assert_eq!(sorted(s.iter()), vec![0, 1, 3]);

        let c = s.find(&3);
        let next = s.erase_at(c);
        assert!(next.is_end());
        assert_eq!(s.bucket_span(), (0, 1));
        assert!(s.markers_consistent());
    }

    #[test]
    fn erase_at_stale_cursor_key_is_none() {
        let mut s = set(4, 2);
        let (c, _) = s.insert(1).unwrap();
        s.erase(&1);
        assert!(s.key_at(c).is_none());
        s.insert(3).unwrap();
        assert!(c.key(&s).is_none(), "stale cursor must not alias a reused slot");
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "stale cursor")]
    fn erase_at_stale_cursor_panics_in_debug() {
        let mut s = set(4, 2);
        let (c, _) = s.insert(1).unwrap();
        s.erase(&1);
        s.insert(2).unwrap();
        s.erase_at(c);
    }

    /// Invariant: a range spanning several buckets is removed and `last`
    /// survives.
    #[test]
    fn erase_range_across_buckets() {
        let mut s = set(16, 8);
        for k in [1, 9, 2, 3, 11, 5, 7] {
            s.insert(k).unwrap();
        }
        // bucket 1: [1, 9], 2: [2], 3: [3, 11], 5: [5], 7: [7]
        let first = s.find(&9);
        let last = s.find(&11);
        let ret = s.erase_range(first, last);
        assert_eq!(ret, last);
        assert_eq!(sorted(s.iter()), vec![1, 5, 7, 11]);
        assert!(s.markers_consistent());

        let first = s.find(&5);
        let ret = s.erase_range(first, s.end());
        assert!(ret.is_end());
        assert_eq!(sorted(s.iter()), vec![1, 11]);
        assert_eq!(s.bucket_span(), (1, 3));
        assert!(s.markers_consistent());
    }

    #[test]
    fn erase_range_everything_clears() {
        let mut s = set(8, 8);
        for k in 0..6 {
            s.insert(k).unwrap();
        }
        let ret = s.erase_range(s.begin(), s.end());
        assert!(ret.is_end());
        assert!(s.is_empty());
        assert_eq!(s.available(), 8);
        assert_eq!(s.bucket_span(), (0, 0));
    }

    #[test]
    fn erase_empty_range_is_noop() {
        let mut s = set(4, 4);
        s.insert(2).unwrap();
        let c = s.find(&2);
        assert_eq!(s.erase_range(c, c), c);
        assert_eq!(s.len(), 1);
    }

    /// Invariant: begin starts at the first occupied bucket, and iteration
    /// visits exactly len() keys.
    #[test]
    fn iteration_starts_at_first_marker() {
        let mut s = set(8, 100);
        for k in [42, 97, 63] {
            s.insert(k).unwrap();
        }
        assert_eq!(s.begin().bucket(), 42);
        assert_eq!(s.bucket_span(), (42, 97));
        let it = s.iter();
        assert_eq!(it.len(), 3);
        assert_eq!(it.copied().collect::<Vec<_>>(), vec![42, 63, 97]);

        let mut c = s.begin();
        let mut n = 0;
        while c != s.end() {
            n += 1;
            c = s.advance(c);
        }
        assert_eq!(n, 3);
        assert!(s.advance(s.end()).is_end());
    }

    #[test]
    fn empty_table_begin_is_end() {
        let s = set(4, 4);
        assert_eq!(s.begin(), s.end());
        assert_eq!(s.iter().count(), 0);
        assert_eq!(s.bucket_span(), (0, 0));
    }

    /// Invariant: take hands back the owned key and unlinks exactly one node.
    #[test]
    fn take_returns_owned_key() {
        let mut m: PoolHashMultiSet<String> = PoolHashMultiSet::with_capacity(4);
        m.insert("a".to_string()).unwrap();
        m.insert("a".to_string()).unwrap();
        assert_eq!(m.take("a"), Some("a".to_string()));
        assert_eq!(m.count("a"), 1);
        assert_eq!(m.take("b"), None);
    }

    /// Invariant: borrowed lookup works (store `String`, query with `&str`),
    /// and insert_owned only builds a key when it will be stored.
    #[test]
    fn borrowed_lookup_and_insert_owned() {
        let mut s: PoolHashSet<String> = PoolHashSet::with_capacity(4);
        let (_, inserted) = s.insert_owned("hello").unwrap();
        assert!(inserted);
        assert!(s.contains("hello"));
        assert_eq!(s.get("hello").map(String::as_str), Some("hello"));
        assert!(!s.contains("world"));
        let (c, inserted) = s.insert_owned("hello").unwrap();
        assert!(!inserted);
        assert_eq!(c.key(&s).map(String::as_str), Some("hello"));
        assert_eq!(s.erase("hello"), 1);
        assert!(s.is_empty());
    }

    /// Invariant: a custom equality predicate replaces `Eq` for every lookup.
    #[test]
    fn custom_key_eq() {
        #[derive(Clone, Default)]
        struct Caseless;
        impl KeyEq<str> for Caseless {
            fn eq(&self, a: &str, b: &str) -> bool {
                a.eq_ignore_ascii_case(b)
            }
        }
        impl KeyEq<String> for Caseless {
            fn eq(&self, a: &String, b: &String) -> bool {
                a.eq_ignore_ascii_case(b)
            }
        }

        // Constant hash keeps every key in one bucket so the predicate alone
        // decides equality.
        let mut s: PoolHashSet<String, ConstBuildHasher, Caseless> =
            PoolHashSet::with_hasher_and_eq(4, 2, ConstBuildHasher, Caseless);
        s.insert("Key".to_string()).unwrap();
        let (_, inserted) = s.insert("KEY".to_string()).unwrap();
        assert!(!inserted);
        assert!(s.contains("key"));
        assert_eq!(s.len(), 1);
    }

    /// Invariant: clear drops every key, frees the pool and resets markers.
    #[test]
    fn clear_drops_payloads() {
        #[derive(Debug)]
        struct Tracked(u32, Rc<Cell<usize>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.1.set(self.1.get() + 1);
            }
        }
        impl PartialEq for Tracked {
            fn eq(&self, o: &Self) -> bool {
                self.0 == o.0
            }
        }
        impl Eq for Tracked {}
        impl Hash for Tracked {
            fn hash<H: Hasher>(&self, h: &mut H) {
                self.0.hash(h);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut s: PoolHashSet<Tracked, IdentityBuildHasher> =
            PoolHashSet::with_hasher(4, 8, IdentityBuildHasher);
        for k in [1, 5, 7] {
            s.insert(Tracked(k, drops.clone())).unwrap();
        }
        s.clear();
        assert_eq!(drops.get(), 3);
        assert!(s.is_empty());
        assert_eq!(s.bucket_span(), (0, 0));
        assert_eq!(s.begin(), s.end());
        s.insert(Tracked(2, drops.clone())).unwrap();
        assert_eq!(s.len(), 1);
        drop(s);
        assert_eq!(drops.get(), 4);
    }

    #[test]
    fn load_factor_is_len_over_buckets() {
        let mut s = set(8, 4);
        assert_eq!(s.load_factor(), 0.0);
        for k in 0..6 {
            s.insert(k).unwrap();
        }
        assert!((s.load_factor() - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn bucket_introspection() {
        let mut s = set(8, 4);
        for k in [2, 6, 10, 3] {
            s.insert(k).unwrap();
        }
        assert_eq!(s.bucket(&10u32), 2);
        assert_eq!(s.bucket_len(2), 3);
        assert_eq!(s.bucket_len(0), 0);
        assert_eq!(s.bucket_count(), 4);
        assert_eq!(s.capacity(), 8);
        assert_eq!(s.available(), 4);
    }

    /// Invariant: try_extend stops at Full and keeps what fit; assign
    /// replaces contents.
    #[test]
    fn try_extend_and_assign() {
        let mut s = set(3, 3);
        assert_eq!(
            s.try_extend([1, 2, 3, 4, 5]),
            Err(InsertError::Full { capacity: 3 })
        );
        assert_eq!(sorted(s.iter()), vec![1, 2, 3]);
        s.assign([7, 8]).unwrap();
        assert_eq!(sorted(s.iter()), vec![7, 8]);
        assert!(s.markers_consistent());
    }

    /// Invariant: clone keeps layout and order; equality ignores layout.
    #[test]
    fn clone_and_equality() {
        let mut m = multiset(8, 4);
        for k in [1, 5, 1, 2] {
            m.insert(k).unwrap();
        }
        let c = m.clone();
        assert_eq!(c, m);
        for b in 0..4 {
            assert!(m.bucket_iter(b).eq(c.bucket_iter(b)));
        }
        assert_eq!(c.bucket_span(), m.bucket_span());

        let mut other = multiset(8, 2);
        for k in [2, 1, 1, 5] {
            other.insert(k).unwrap();
        }
        assert_eq!(other, m);
        other.erase(&1);
        other.insert(5).unwrap();
        other.insert(1).unwrap();
        assert_ne!(other, m, "multiplicities differ");
    }

    /// Invariant: a pool handed over with unlinked leftovers is emptied.
    #[test]
    fn with_pool_drops_leftovers() {
        let mut pool: FixedPool<Node<u32>> = FixedPool::new(2);
        pool.allocate(Node::new(99)).unwrap();
        let mut t: PoolHashSet<u32, IdentityBuildHasher> =
            HashTable::with_pool(pool, 2, IdentityBuildHasher, StdEq);
        assert!(t.is_empty());
        assert_eq!(t.available(), 2);
        t.try_extend([1, 2]).unwrap();
        assert!(t.is_full());
        assert!(!t.contains(&99));
    }

    #[test]
    fn debug_formats_as_set() {
        let mut s = set(2, 1);
        s.insert(3).unwrap();
        assert_eq!(format!("{:?}", s), "{3}");
    }

    /// Invariant: lookups work under full collisions; every key shares
    /// bucket 0 and equality alone separates them.
    #[test]
    fn collisions_resolve_by_equality() {
        let mut s = PoolHashSet::<u32, ConstBuildHasher>::with_hasher(8, 4, ConstBuildHasher);
        for k in 0..8 {
            s.insert(k).unwrap();
        }
        assert_eq!(s.bucket_len(0), 8);
        for k in 0..8 {
            assert_eq!(s.get(&k), Some(&k));
        }
        let seen: BTreeSet<u32> = s.iter().copied().collect();
        assert_eq!(seen.len(), 8);
        assert_eq!(s.bucket_span(), (0, 0));
    }

    /// Invariant (debug-only): re-entering the table from `Hash` during a
    /// lookup panics; in release builds this test is skipped.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_hash_during_find() {
        struct Sneaky {
            id: u32,
            table: *const PoolHashSet<Sneaky>,
        }
        impl PartialEq for Sneaky {
            fn eq(&self, o: &Self) -> bool {
                self.id == o.id
            }
        }
        impl Eq for Sneaky {}
        impl Hash for Sneaky {
            fn hash<H: Hasher>(&self, h: &mut H) {
                if !self.table.is_null() {
                    // Reach back into the table while it is probing.
                    unsafe {
                        let _ = (*self.table).len();
                        let _ = (*self.table).contains(&Sneaky {
                            id: 0,
                            table: core::ptr::null(),
                        });
                    }
                }
                self.id.hash(h);
            }
        }

        let s: PoolHashSet<Sneaky> = PoolHashSet::with_capacity(2);
        let query = Sneaky {
            id: 1,
            table: &s as *const _,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = s.contains(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}

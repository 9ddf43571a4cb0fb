//! Node pool: fixed-capacity slot storage for table nodes.
//!
//! The table never allocates nodes any other way. A pool hands out a
//! `NodeKey` for each stored item and reclaims the slot on `release`.
//! `FixedPool` reserves all of its slots up front and refuses to grow past
//! that reservation, so once built it performs no further allocation.

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Generational key of a pooled node. A key whose slot has been
    /// released (and possibly reused) never resolves again.
    pub struct NodeKey;
}

/// Allocator capability required by the table.
pub trait Pool {
    type Item;

    /// Store `item` in a free slot. When the pool is exhausted the item is
    /// handed back untouched.
    fn allocate(&mut self, item: Self::Item) -> Result<NodeKey, Self::Item>;

    /// Reclaim a slot, returning its item. `None` for keys that are not live.
    fn release(&mut self, key: NodeKey) -> Option<Self::Item>;

    /// Reclaim every slot at once, dropping all live items.
    fn release_all(&mut self);

    fn get(&self, key: NodeKey) -> Option<&Self::Item>;

    fn get_mut(&mut self, key: NodeKey) -> Option<&mut Self::Item>;

    /// Number of live items.
    fn len(&self) -> usize;

    /// Maximum number of live items.
    fn capacity(&self) -> usize;

    fn available(&self) -> usize {
        self.capacity() - self.len()
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pool with a fixed number of slots, backed by a pre-sized `SlotMap`.
pub struct FixedPool<T> {
    slots: SlotMap<NodeKey, T>,
    capacity: usize,
}

impl<T> FixedPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SlotMap::with_capacity_and_key(capacity),
            capacity,
        }
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.slots.contains_key(key)
    }
}

impl<T> Pool for FixedPool<T> {
    type Item = T;

    fn allocate(&mut self, item: T) -> Result<NodeKey, T> {
        if self.slots.len() >= self.capacity {
            return Err(item);
        }
        Ok(self.slots.insert(item))
    }

    #[inline]
    fn release(&mut self, key: NodeKey) -> Option<T> {
        self.slots.remove(key)
    }

    fn release_all(&mut self) {
        self.slots.clear();
    }

    #[inline]
    fn get(&self, key: NodeKey) -> Option<&T> {
        self.slots.get(key)
    }

    #[inline]
    fn get_mut(&mut self, key: NodeKey) -> Option<&mut T> {
        self.slots.get_mut(key)
    }

    #[inline]
    fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> core::fmt::Debug for FixedPool<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedPool")
            .field("len", &self.slots.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

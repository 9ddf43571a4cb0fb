//! Intrusive singly-linked chain over pooled nodes.
//!
//! The link lives inside each node (`Link::next`), so linking and
//! unlinking never allocate. A chain only stores its head; the terminal
//! sentinel is `None`. Every operation is expressed as "after a position"
//! and `Position::BeforeBegin` stands for the head link, so the first node
//! needs no special case.

use crate::pool::{NodeKey, Pool};

/// Access to the embedded link of a node.
pub trait Link {
    fn next(&self) -> Option<NodeKey>;
    fn set_next(&mut self, next: Option<NodeKey>);
}

/// A pooled node: one key plus the link to its successor in the chain.
#[derive(Debug)]
pub struct Node<K> {
    key: K,
    next: Option<NodeKey>,
}

impl<K> Node<K> {
    pub(crate) fn new(key: K) -> Self {
        Self { key, next: None }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn into_key(self) -> K {
        self.key
    }
}

impl<K> Link for Node<K> {
    #[inline]
    fn next(&self) -> Option<NodeKey> {
        self.next
    }

    #[inline]
    fn set_next(&mut self, next: Option<NodeKey>) {
        self.next = next;
    }
}

/// A position a node can be linked after.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Position {
    /// The virtual position preceding the first node.
    BeforeBegin,
    Node(NodeKey),
}

/// Head of one intrusive chain. Nodes themselves live in a `Pool`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Chain {
    head: Option<NodeKey>,
}

impl Chain {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub fn before_begin(&self) -> Position {
        Position::BeforeBegin
    }

    /// First node, or `None` (the end sentinel) when empty.
    #[inline]
    pub fn begin(&self) -> Option<NodeKey> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Node following `pos`, or `None` at the end of the chain.
    #[inline]
    pub fn next_of<P>(&self, pool: &P, pos: Position) -> Option<NodeKey>
    where
        P: Pool,
        P::Item: Link,
    {
        match pos {
            Position::BeforeBegin => self.head,
            Position::Node(k) => pool.get(k).and_then(Link::next),
        }
    }

    fn set_next_of<P>(&mut self, pool: &mut P, pos: Position, next: Option<NodeKey>)
    where
        P: Pool,
        P::Item: Link,
    {
        match pos {
            Position::BeforeBegin => self.head = next,
            Position::Node(k) => match pool.get_mut(k) {
                Some(node) => node.set_next(next),
                None => debug_assert!(false, "position refers to a released node"),
            },
        }
    }

    /// Link `node` directly after `pos`. The node must already be allocated
    /// from `pool` and must not be linked into any chain.
    pub fn insert_after<P>(&mut self, pool: &mut P, pos: Position, node: NodeKey)
    where
        P: Pool,
        P::Item: Link,
    {
        let next = self.next_of(&*pool, pos);
        match pool.get_mut(node) {
            Some(n) => n.set_next(next),
            None => {
                debug_assert!(false, "inserting a node that is not allocated");
                return;
            }
        }
        self.set_next_of(pool, pos, Some(node));
    }

    /// Unlink the node after `pos` and return it. The node stays allocated;
    /// releasing it is up to the caller.
    pub fn erase_after<P>(&mut self, pool: &mut P, pos: Position) -> Option<NodeKey>
    where
        P: Pool,
        P::Item: Link,
    {
        let victim = self.next_of(&*pool, pos)?;
        let after = pool.get(victim).and_then(Link::next);
        self.set_next_of(pool, pos, after);
        if let Some(n) = pool.get_mut(victim) {
            n.set_next(None);
        }
        Some(victim)
    }

    /// Unlink every node after `pos` up to, not including, `until`
    /// (`None` = to the end). The chain is relinked once; `release` is then
    /// called for each detached node in order. Returns the number detached.
    pub fn erase_after_until<P, F>(
        &mut self,
        pool: &mut P,
        pos: Position,
        until: Option<NodeKey>,
        mut release: F,
    ) -> usize
    where
        P: Pool,
        P::Item: Link,
        F: FnMut(&mut P, NodeKey),
    {
        let mut cur = self.next_of(&*pool, pos);
        if cur == until {
            return 0;
        }
        self.set_next_of(pool, pos, until);

        let mut n = 0;
        while let Some(k) = cur {
            if Some(k) == until {
                break;
            }
            let next = pool.get(k).and_then(Link::next);
            release(pool, k);
            n += 1;
            cur = next;
        }
        debug_assert!(cur == until, "range end is not reachable from position");
        n
    }

    /// Move every node of `other` (which must share `pool`) after `pos`,
    /// keeping their order. `other` is left empty.
    pub fn splice_after<P>(&mut self, pool: &mut P, pos: Position, other: &mut Chain)
    where
        P: Pool,
        P::Item: Link,
    {
        let Some(first) = other.head.take() else {
            return;
        };
        let mut tail = first;
        while let Some(next) = pool.get(tail).and_then(Link::next) {
            tail = next;
        }
        let after = self.next_of(&*pool, pos);
        if let Some(n) = pool.get_mut(tail) {
            n.set_next(after);
        }
        self.set_next_of(pool, pos, Some(first));
    }

    /// Forget every link without touching the nodes.
    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Number of nodes, found by walking the chain.
    pub fn len<P>(&self, pool: &P) -> usize
    where
        P: Pool,
        P::Item: Link,
    {
        self.iter(pool).count()
    }

    pub fn iter<'a, P>(&self, pool: &'a P) -> ChainIter<'a, P> {
        ChainIter {
            pool,
            cur: self.head,
        }
    }
}

/// Iterator over the node keys of one chain.
pub struct ChainIter<'a, P> {
    pool: &'a P,
    cur: Option<NodeKey>,
}

impl<'a, P> Iterator for ChainIter<'a, P>
where
    P: Pool,
    P::Item: Link,
{
    type Item = NodeKey;

    #[inline]
    fn next(&mut self) -> Option<NodeKey> {
        let k = self.cur?;
        self.cur = self.pool.get(k).and_then(Link::next);
        Some(k)
    }
}

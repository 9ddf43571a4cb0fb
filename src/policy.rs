//! Duplicate-key policy and the key equality capability.
//!
//! One table engine serves both sets and multisets; the policy type is the
//! only switch. Equality is a value stored in the table, so callers can
//! supply predicates other than `Eq` (the hasher must agree with it).

/// Chooses what `insert` does when an equal key is already present.
pub trait DuplicatePolicy {
    const ALLOW_DUPLICATES: bool;
}

/// Reject duplicates: `insert` returns the existing element.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Unique {}

/// Allow duplicates: equal keys are kept contiguous within their bucket.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Multi {}

impl DuplicatePolicy for Unique {
    const ALLOW_DUPLICATES: bool = false;
}

impl DuplicatePolicy for Multi {
    const ALLOW_DUPLICATES: bool = true;
}

/// Equality predicate over `Q`. Lookups compare `key.borrow()` against the
/// query, so implementing this for a borrowed form (`str`, `[u8]`, ...)
/// enables lookups without building a full key.
pub trait KeyEq<Q: ?Sized> {
    fn eq(&self, a: &Q, b: &Q) -> bool;
}

/// Equality via `Eq`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StdEq;

impl<Q: ?Sized + Eq> KeyEq<Q> for StdEq {
    #[inline]
    fn eq(&self, a: &Q, b: &Q) -> bool {
        a == b
    }
}

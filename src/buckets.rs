//! Bucket array: a fixed number of chains plus first/last occupancy markers.
//!
//! `first` and `last` are the lowest and highest indices of non-empty
//! buckets. Buckets strictly between them may be empty; iteration skips
//! those on the fly. With no elements both markers sit at 0.

use crate::chain::Chain;

pub(crate) struct BucketArray {
    chains: Box<[Chain]>,
    first: usize,
    last: usize,
}

impl BucketArray {
    pub(crate) fn new(count: usize) -> Self {
        assert!(count > 0, "bucket count must be non-zero");
        Self {
            chains: vec![Chain::new(); count].into_boxed_slice(),
            first: 0,
            last: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.chains.len()
    }

    #[inline]
    pub(crate) fn index_for(&self, hash: u64) -> usize {
        (hash % self.chains.len() as u64) as usize
    }

    #[inline]
    pub(crate) fn chain(&self, index: usize) -> &Chain {
        &self.chains[index]
    }

    #[inline]
    pub(crate) fn chain_mut(&mut self, index: usize) -> &mut Chain {
        &mut self.chains[index]
    }

    #[inline]
    pub(crate) fn first(&self) -> usize {
        self.first
    }

    #[inline]
    pub(crate) fn last(&self) -> usize {
        self.last
    }

    /// Update the markers after a node was linked into `index`; `len_after`
    /// is the table size including that node.
    pub(crate) fn note_insert(&mut self, index: usize, len_after: usize) {
        if len_after == 1 {
            self.first = index;
            self.last = index;
        } else if index < self.first {
            self.first = index;
        } else if index > self.last {
            self.last = index;
        }
    }

    /// Restore the markers after a node was unlinked from `index`.
    ///
    /// Emptying the `first` bucket scans forward; emptying the `last` bucket
    /// scans backward, never past `first`. A single call is O(bucket_count)
    /// in the worst case; draining a whole table costs O(bucket_count) in
    /// total.
    pub(crate) fn repair_after_erase(&mut self, index: usize, len_after: usize) {
        if len_after == 0 {
            self.first = 0;
            self.last = 0;
            return;
        }
        if !self.chains[index].is_empty() {
            return;
        }
        if index == self.first {
            let old = self.first;
            while self.chains[self.first].is_empty() && self.first < self.last {
                self.first += 1;
            }
            log::trace!("first bucket marker moved {} -> {}", old, self.first);
        } else if index == self.last {
            let old = self.last;
            while self.chains[self.last].is_empty() && self.last > self.first {
                self.last -= 1;
            }
            log::trace!("last bucket marker moved {} -> {}", old, self.last);
        }
    }

    /// Next non-empty bucket after `index`, not looking past `last`.
    pub(crate) fn next_occupied(&self, index: usize) -> Option<usize> {
        (index + 1..=self.last).find(|&i| !self.chains[i].is_empty())
    }

    /// Forget every chain and reset the markers. Only buckets inside the
    /// occupied span can hold links.
    pub(crate) fn reset(&mut self) {
        for chain in &mut self.chains[self.first..=self.last] {
            chain.clear();
        }
        self.first = 0;
        self.last = 0;
    }

    /// Whether the markers describe the current occupancy exactly.
    #[cfg(test)]
    pub(crate) fn markers_consistent(&self) -> bool {
        let occupied: Vec<usize> = (0..self.chains.len())
            .filter(|&i| !self.chains[i].is_empty())
            .collect();
        match (occupied.first(), occupied.last()) {
            (Some(&lo), Some(&hi)) => self.first == lo && self.last == hi,
            _ => self.first == 0 && self.last == 0,
        }
    }
}

//! C6 — Parent cache: a bounded `inode -> (parent, offset)` hint table.
//!
//! Every entry is a hint, never a source of truth: the einode engine
//! re-validates whatever it reads at the hinted offset against the expected
//! inode number before trusting it, so a stale or evicted entry is always
//! correctness-preserving. Capacity and eviction policy therefore only
//! affect hit rate, never correctness — this crate picks LRU for exactly
//! that reason.

use crate::constants::PARENT_CACHE_CAPACITY;
use crate::lru::LRUCache;
use std::sync::Mutex;

/// `(parent inode, byte offset of the child's record within the parent's
/// directory object)`.
pub type ParentHint = (u64, u64);

/// Bounded, LRU-evicted map from child inode to its parent hint.
pub struct ParentCache {
    inner: Mutex<LRUCache<u64, ParentHint, PARENT_CACHE_CAPACITY>>,
}

impl Default for ParentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ParentCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LRUCache::new()),
        }
    }

    /// Looks up the hint for `inode`, marking it most-recently-used on hit.
    pub fn get(&self, inode: u64) -> Option<ParentHint> {
        self.inner.lock().unwrap().get(inode).copied()
    }

    /// Records (or refreshes) the hint for `inode`.
    pub fn set(&self, inode: u64, parent: u64, offset: u64) {
        self.inner.lock().unwrap().put(inode, (parent, offset));
    }

    /// Drops any hint held for `inode`. A miss is not an error.
    pub fn delete(&self, inode: u64) {
        self.inner.lock().unwrap().remove(&inode);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_until_invalidated() {
        let cache = ParentCache::new();
        cache.set(42, 1, 128);
        assert_eq!(cache.get(42), Some((1, 128)));
        cache.delete(42);
        assert_eq!(cache.get(42), None);
    }

    #[test]
    fn miss_on_an_unknown_inode_is_not_fatal() {
        let cache = ParentCache::new();
        assert_eq!(cache.get(999), None);
    }
}

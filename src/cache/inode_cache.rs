//! C10 — Top-level inode cache: owns one [`ParentEntry`] per directory the
//! cache has touched, plus a global `inode -> parent` index so a lookup by
//! bare inode number never has to scan every directory.
//!
//! Cross-directory operations ([`InodeCache::move_inode`]) always touch the
//! lower-numbered parent first. Nothing here holds two directory locks at
//! once — each [`ParentEntry`] call is self-contained — but picking a fixed
//! order keeps every caller consistent, which is what actually matters once
//! a real two-phase lock is added on top.

use crate::cache::parent_entry::{ParentEntry, WriteBackCode};
use crate::einode::Einode;
use crate::error::{Error, Presence, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct InodeCache {
    entries: Mutex<HashMap<u64, Arc<ParentEntry>>>,
    by_inode: Mutex<HashMap<u64, u64>>,
    /// Which storage-routing subtree root each cached directory belongs to,
    /// so a write-back pass can rebuild the right engine for a directory
    /// without needing the directory's own inode to equal a partition root.
    subtree_roots: Mutex<HashMap<u64, u64>>,
}

impl Default for InodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            by_inode: Mutex::new(HashMap::new()),
            subtree_roots: Mutex::new(HashMap::new()),
        }
    }

    fn entry_for(&self, parent: u64) -> Arc<ParentEntry> {
        self.entries
            .lock()
            .unwrap()
            .entry(parent)
            .or_insert_with(|| Arc::new(ParentEntry::new(parent)))
            .clone()
    }

    pub fn entry(&self, parent: u64) -> Option<Arc<ParentEntry>> {
        self.entries.lock().unwrap().get(&parent).cloned()
    }

    fn set_parent(&self, inode: u64, parent: u64) {
        self.by_inode.lock().unwrap().insert(inode, parent);
    }

    pub fn parent_of(&self, inode: u64) -> Option<u64> {
        self.by_inode.lock().unwrap().get(&inode).copied()
    }

    fn set_subtree_root(&self, parent: u64, subtree_root: u64) {
        self.subtree_roots.lock().unwrap().entry(parent).or_insert(subtree_root);
    }

    /// The subtree root a cached directory was loaded or created under, if
    /// this cache has ever been told one for it.
    pub fn subtree_root_of(&self, parent: u64) -> Option<u64> {
        self.subtree_roots.lock().unwrap().get(&parent).copied()
    }

    /// Adds a freshly created child under a directory routed through
    /// `subtree_root`, tagging the creation with the journal chunk that
    /// caused it.
    pub fn add_to_cache(&self, subtree_root: u64, parent: u64, chunk_id: u64, e: Einode) {
        let inode = e.inode;
        self.entry_for(parent).add_entry(chunk_id, e);
        self.set_parent(inode, parent);
        self.set_subtree_root(parent, subtree_root);
    }

    /// Loads a child recovered from the backing store (clean, already
    /// persisted) under a directory routed through `subtree_root`.
    pub fn load_into_cache(&self, subtree_root: u64, parent: u64, e: Einode) {
        let inode = e.inode;
        self.entry_for(parent).load_entry(e);
        self.set_parent(inode, parent);
        self.set_subtree_root(parent, subtree_root);
    }

    /// Applies an update tagged with `chunk_id` to the cached entry for
    /// `e.inode`, materializing its parent entry if needed.
    ///
    /// The parent is taken from `parent` if given, falling back to whatever
    /// the global by-inode index already has cached for this inode. Neither
    /// resolving is a fatal inconsistency: the update carries no parent and
    /// none was ever recorded for this inode.
    pub fn update_inode_cache(&self, parent: Option<u64>, chunk_id: u64, e: Einode) -> Result<()> {
        let inode = e.inode;
        let parent = match parent.or_else(|| self.parent_of(inode)) {
            Some(p) => p,
            None => {
                return Err(Error::parent_unknown(format!(
                    "update_inode_cache: inode {inode} carries no parent and none is cached for it"
                )))
            }
        };
        self.entry_for(parent).update_entry(chunk_id, e)?;
        self.set_parent(inode, parent);
        Ok(())
    }

    /// Three-valued lookup: consults the parent map, then the cached
    /// directory entry. A directory this cache has never touched reports
    /// `NotPresent` rather than falling back to storage itself — callers
    /// that need the storage fallback do it themselves and then call
    /// [`Self::add_to_cache`] or [`Self::load_into_cache`].
    pub fn get_einode(&self, inode: u64) -> Presence<Einode> {
        let Some(parent) = self.parent_of(inode) else {
            return Presence::NotPresent;
        };
        match self.entry(parent) {
            Some(entry) => entry.get(inode),
            None => Presence::NotPresent,
        }
    }

    pub fn lookup_by_object_name(&self, parent: u64, name: &str) -> Presence<Einode> {
        match self.entry(parent) {
            Some(entry) => entry.lookup_by_object_name(name),
            None => Presence::NotPresent,
        }
    }

    pub fn read_dir(&self, parent: u64, offset: usize, limit: usize) -> (Vec<Einode>, usize) {
        match self.entry(parent) {
            Some(entry) => entry.read_dir(offset, limit),
            None => (Vec::new(), 0),
        }
    }

    /// Best-effort cycle guard over whatever ancestry the global index
    /// currently knows, mirroring [`crate::einode::engine::EinodeEngine`]'s
    /// check. A cold-cache ancestor chain outside what's loaded here is not
    /// caught; this only rejects cycles the cache can already see.
    fn would_create_cycle(&self, inode: u64, new_parent: u64) -> bool {
        if new_parent == inode {
            return true;
        }
        let mut current = new_parent;
        let mut steps = 0;
        while let Some(parent) = self.parent_of(current) {
            if parent == inode {
                return true;
            }
            current = parent;
            steps += 1;
            if steps > crate::constants::MAX_PARENT_HIERARCHY_DEPTH {
                return false;
            }
        }
        false
    }

    /// Moves `inode` from `old_parent` to `new_parent`, touching the
    /// lower-numbered directory first and tagging both the trash-here and
    /// add-there halves with `chunk_id`.
    pub fn move_inode(&self, inode: u64, old_parent: u64, new_parent: u64, chunk_id: u64) -> Result<()> {
        if old_parent == new_parent {
            return Ok(());
        }
        if self.would_create_cycle(inode, new_parent) {
            return Err(Error::invalid_state(format!(
                "move would place inode {inode} under its own descendant {new_parent}"
            )));
        }
        let (first, second) = if old_parent < new_parent {
            (old_parent, new_parent)
        } else {
            (new_parent, old_parent)
        };
        let _first = self.entry_for(first);
        let _second = self.entry_for(second);

        let moved = self
            .entry_for(old_parent)
            .move_from(chunk_id, inode)
            .ok_or_else(|| Error::not_found(format!("inode {inode} not cached under parent {old_parent}")))?;
        self.set_parent(inode, new_parent);
        if let Some(subtree_root) = self.subtree_root_of(old_parent) {
            self.set_subtree_root(new_parent, subtree_root);
        }
        self.entry_for(new_parent).move_to(chunk_id, moved);
        Ok(())
    }

    /// Per-parent lists of dirty-or-trashed inodes, for a write-back pass to
    /// drain. Directories with nothing pending are omitted.
    pub fn get_dirty_map(&self) -> HashMap<u64, (Vec<u64>, Vec<u64>)> {
        let entries = self.entries.lock().unwrap();
        let mut out = HashMap::new();
        for (&parent, entry) in entries.iter() {
            let dirty = entry.dirty_inodes();
            let trashed = entry.trashed_inodes();
            if !dirty.is_empty() || !trashed.is_empty() {
                out.insert(parent, (dirty, trashed));
            }
        }
        out
    }

    /// Classifies the pending write-back for a live, dirty child.
    pub fn write_back_update(&self, parent: u64, inode: u64) -> WriteBackCode {
        match self.entry(parent) {
            Some(entry) => entry.handle_write_back_update(inode),
            None => WriteBackCode::Missing,
        }
    }

    /// Classifies the pending write-back for a trashed child.
    pub fn write_back_delete(&self, parent: u64, inode: u64) -> WriteBackCode {
        match self.entry(parent) {
            Some(entry) => entry.handle_write_back_delete(inode),
            None => WriteBackCode::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::einode::{Attributes, Einode};

    fn einode(inode: u64, name: &str) -> Einode {
        Einode::new(inode, name, Attributes::default())
    }

    #[test]
    fn add_then_get_by_bare_inode_number() {
        let cache = InodeCache::new();
        cache.add_to_cache(0, 1, 1, einode(2, "a"));
        assert_eq!(cache.get_einode(2).into_option().unwrap().name, "a");
        assert_eq!(cache.parent_of(2), Some(1));
    }

    #[test]
    fn update_inode_cache_on_an_unknown_inode_is_parent_unknown() {
        let cache = InodeCache::new();
        let err = cache.update_inode_cache(None, 1, einode(999, "a")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParentUnknown);
    }

    #[test]
    fn update_inode_cache_materializes_the_parent_entry_when_given_explicitly() {
        let cache = InodeCache::new();
        cache.update_inode_cache(Some(1), 7, einode(2, "a")).unwrap();
        assert_eq!(cache.parent_of(2), Some(1));
        assert_eq!(cache.get_einode(2).into_option().unwrap().name, "a");
    }

    #[test]
    fn move_inode_updates_both_directories_and_the_global_index() {
        let cache = InodeCache::new();
        cache.load_into_cache(0, 1, einode(5, "a"));
        cache.move_inode(5, 1, 2, 3).unwrap();

        assert_eq!(cache.parent_of(5), Some(2));
        assert_eq!(cache.lookup_by_object_name(1, "a"), Presence::Deleted);
        assert_eq!(cache.lookup_by_object_name(2, "a").into_option().unwrap().inode, 5);
        assert_eq!(cache.write_back_delete(1, 5), WriteBackCode::DeleteAfter);
        assert_eq!(cache.write_back_update(2, 5), WriteBackCode::Create);
        assert_eq!(cache.subtree_root_of(2), Some(0));
    }

    #[test]
    fn move_inode_rejects_a_cycle_through_a_known_descendant() {
        let cache = InodeCache::new();
        cache.load_into_cache(0, 1, einode(2, "a"));
        cache.load_into_cache(0, 2, einode(3, "b"));
        assert!(cache.move_inode(2, 1, 3, 1).is_err());
    }

    #[test]
    fn dirty_map_reports_only_directories_with_pending_work() {
        let cache = InodeCache::new();
        cache.load_into_cache(0, 1, einode(2, "a"));
        cache.add_to_cache(0, 3, 1, einode(4, "b"));
        let map = cache.get_dirty_map();
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&3));
    }
}

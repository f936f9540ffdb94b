//! C9 — Parent-entry cache: the write-back cache for one directory's
//! children, keyed by child inode number.
//!
//! Reads are served out of `live`. A delete does not drop the entry
//! immediately — it moves to `trash`, so a later write-back pass still has
//! something to tell the backing store to delete. `order`/`position` give
//! O(1) positional `read_dir` without committing to any on-disk order:
//! appends push onto the end, deletes swap the last element into the
//! vacated slot and pop.
//!
//! Every mutation is tagged with the id of the journal chunk that pinned
//! it; a child is dirty exactly when its chunk-id set is non-empty (or it
//! is in trash), and write-back hands the accumulated chunk ids back to the
//! caller once the corresponding storage operation durably lands, so the
//! journal can be told those chunks are no longer needed for recovery.

use crate::einode::Einode;
use crate::error::{Error, Presence, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// What a write-back pass must do with one pending change, once it decides
/// to drain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBackCode {
    /// Overwrite the existing on-disk record.
    PlainUpdate,
    /// Append a new record; the backing store never had one for this inode.
    Create,
    /// Issue a real delete against the backing store: the record existed
    /// there before this entry was trashed.
    DeleteAfter,
    /// The record was created and deleted within the same cache generation
    /// and never reached the backing store; there is nothing to write.
    Discarded,
    /// Not dirty (or not present at all); nothing to do.
    Missing,
}

struct Slot {
    einode: Einode,
    /// Whether the backing store already held a record for this inode when
    /// it entered the cache (recovered on load) as opposed to being created
    /// fresh while cached.
    existed_on_backing_store: bool,
    /// Journal chunk ids that pinned a mutation to this slot since its last
    /// write-back. Non-empty iff the slot is dirty.
    chunk_ids: Vec<u64>,
}

impl Slot {
    fn is_dirty(&self) -> bool {
        !self.chunk_ids.is_empty()
    }
}

struct Inner {
    live: HashMap<u64, Slot>,
    trash: HashMap<u64, Slot>,
    name_index: HashMap<String, u64>,
    /// Names of children currently in `trash`, so a lookup by name can
    /// still report *deleted* instead of collapsing to *not-present* once
    /// the live name index has forgotten them.
    trash_name_index: HashMap<String, u64>,
    order: Vec<u64>,
    position: HashMap<u64, usize>,
    /// Whether this directory's full child set is known to be cached (as
    /// opposed to a partial view assembled from individual lookups).
    full_present: bool,
    time_stamp: u64,
}

impl Inner {
    fn push_order(&mut self, inode: u64) {
        self.position.insert(inode, self.order.len());
        self.order.push(inode);
    }

    fn remove_order(&mut self, inode: u64) {
        let Some(&idx) = self.position.get(&inode) else {
            return;
        };
        let last = self.order.len() - 1;
        self.order.swap(idx, last);
        self.order.pop();
        self.position.remove(&inode);
        if idx <= last {
            if let Some(&moved) = self.order.get(idx) {
                self.position.insert(moved, idx);
            }
        }
    }

    /// Moves a live slot into trash, appending `chunk_id` to whatever chunk
    /// ids were already pinning it.
    fn trash_live(&mut self, inode: u64, chunk_id: u64) -> Option<Einode> {
        let slot = self.live.remove(&inode)?;
        self.name_index.remove(&slot.einode.name);
        self.remove_order(inode);
        let einode = slot.einode.clone();
        let existed = slot.existed_on_backing_store;
        let mut chunk_ids = slot.chunk_ids;
        chunk_ids.push(chunk_id);
        self.trash_name_index.insert(einode.name.clone(), inode);
        self.trash.insert(
            inode,
            Slot {
                einode: slot.einode,
                existed_on_backing_store: existed,
                chunk_ids,
            },
        );
        Some(einode)
    }
}

/// The cached state of one directory's children.
pub struct ParentEntry {
    parent: u64,
    inner: Mutex<Inner>,
}

impl ParentEntry {
    pub fn new(parent: u64) -> Self {
        Self {
            parent,
            inner: Mutex::new(Inner {
                live: HashMap::new(),
                trash: HashMap::new(),
                name_index: HashMap::new(),
                trash_name_index: HashMap::new(),
                order: Vec::new(),
                position: HashMap::new(),
                full_present: false,
                time_stamp: 0,
            }),
        }
    }

    pub fn parent(&self) -> u64 {
        self.parent
    }

    pub fn touch(&self, time_stamp: u64) {
        self.inner.lock().unwrap().time_stamp = time_stamp;
    }

    pub fn time_stamp(&self) -> u64 {
        self.inner.lock().unwrap().time_stamp
    }

    pub fn set_full_present(&self, value: bool) {
        self.inner.lock().unwrap().full_present = value;
    }

    pub fn is_full_present(&self) -> bool {
        self.inner.lock().unwrap().full_present
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.live.values().any(Slot::is_dirty) || !inner.trash.is_empty()
    }

    /// Adds a child, dirty from the start (never existed on the backing
    /// store), tagging the creation with the journal chunk that caused it.
    pub fn add_entry(&self, chunk_id: u64, e: Einode) {
        let mut inner = self.inner.lock().unwrap();
        let inode = e.inode;
        inner.name_index.insert(e.name.clone(), inode);
        inner.push_order(inode);
        inner.live.insert(
            inode,
            Slot {
                einode: e,
                existed_on_backing_store: false,
                chunk_ids: vec![chunk_id],
            },
        );
    }

    /// Loads an entry recovered from the backing store: present, clean, and
    /// already persisted. Nothing pins it to a journal chunk yet.
    pub fn load_entry(&self, e: Einode) {
        let mut inner = self.inner.lock().unwrap();
        let inode = e.inode;
        inner.name_index.insert(e.name.clone(), inode);
        inner.push_order(inode);
        inner.live.insert(
            inode,
            Slot {
                einode: e,
                existed_on_backing_store: true,
                chunk_ids: Vec::new(),
            },
        );
    }

    /// Three-valued lookup: `Present` if live, `Deleted` if trashed but not
    /// yet written back, `NotPresent` if this entry has never heard of the
    /// inode.
    pub fn get(&self, inode: u64) -> Presence<Einode> {
        let inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.live.get(&inode) {
            return Presence::Present(slot.einode.clone());
        }
        if inner.trash.contains_key(&inode) {
            return Presence::Deleted;
        }
        Presence::NotPresent
    }

    /// Same three-valued contract as [`Self::get`], keyed by name. A name
    /// that currently resolves to a live child reports `Present` even if an
    /// older trashed child also carried it.
    pub fn lookup_by_object_name(&self, name: &str) -> Presence<Einode> {
        let inner = self.inner.lock().unwrap();
        if let Some(&inode) = inner.name_index.get(name) {
            if let Some(slot) = inner.live.get(&inode) {
                return Presence::Present(slot.einode.clone());
            }
        }
        if inner.trash_name_index.contains_key(name) {
            return Presence::Deleted;
        }
        Presence::NotPresent
    }

    /// Overwrites a child's payload and tags it with `chunk_id`, marking it
    /// dirty. Creates a cache-only child if none is live under this inode
    /// yet. Does not change which directory it lives in; use
    /// [`Self::rename`] for a name change within the same directory.
    pub fn update_entry(&self, chunk_id: u64, e: Einode) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let inode = e.inode;
        if let Some(slot) = inner.live.get_mut(&inode) {
            if slot.einode.name != e.name {
                let old_name = slot.einode.name.clone();
                inner.name_index.remove(&old_name);
                inner.name_index.insert(e.name.clone(), inode);
            }
            slot.einode = e;
            slot.chunk_ids.push(chunk_id);
        } else {
            inner.name_index.insert(e.name.clone(), inode);
            inner.push_order(inode);
            inner.live.insert(
                inode,
                Slot {
                    einode: e,
                    existed_on_backing_store: false,
                    chunk_ids: vec![chunk_id],
                },
            );
        }
        Ok(())
    }

    pub fn rename(&self, chunk_id: u64, inode: u64, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        let mut e = self
            .get(inode)
            .into_option()
            .ok_or_else(|| Error::not_found(format!("inode {inode} not cached")))?;
        e.name = new_name;
        self.update_entry(chunk_id, e)
    }

    /// Removes `inode` from `live` for a move to another directory, trashing
    /// it here exactly as a delete would, and returns the moved record.
    pub fn move_from(&self, chunk_id: u64, inode: u64) -> Option<Einode> {
        self.inner.lock().unwrap().trash_live(inode, chunk_id)
    }

    /// Inserts an entry moved in from another directory, fresh and dirty
    /// here (the backing store under this directory's object never had it),
    /// tagged with the chunk id of the move.
    pub fn move_to(&self, chunk_id: u64, e: Einode) {
        self.add_entry(chunk_id, e);
    }

    pub fn delete(&self, chunk_id: u64, inode: u64) -> Option<Einode> {
        self.inner.lock().unwrap().trash_live(inode, chunk_id)
    }

    /// Classifies the pending change for `inode` in `live`, if any.
    pub fn handle_write_back_update(&self, inode: u64) -> WriteBackCode {
        let inner = self.inner.lock().unwrap();
        match inner.live.get(&inode) {
            Some(slot) if slot.is_dirty() && slot.existed_on_backing_store => WriteBackCode::PlainUpdate,
            Some(slot) if slot.is_dirty() => WriteBackCode::Create,
            _ => WriteBackCode::Missing,
        }
    }

    /// Call once the write-back for `inode` (as classified above) has been
    /// durably applied, to clear its pending chunk ids and mark it present
    /// on the backing store. Returns the chunk ids that were pinning it, so
    /// the caller can tell the journal they are no longer needed.
    pub fn mark_written_back(&self, inode: u64) -> Vec<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.live.get_mut(&inode) {
            Some(slot) => {
                slot.existed_on_backing_store = true;
                std::mem::take(&mut slot.chunk_ids)
            }
            None => Vec::new(),
        }
    }

    /// Classifies the pending change for `inode` in `trash`, if any.
    pub fn handle_write_back_delete(&self, inode: u64) -> WriteBackCode {
        let inner = self.inner.lock().unwrap();
        match inner.trash.get(&inode) {
            Some(slot) if slot.existed_on_backing_store => WriteBackCode::DeleteAfter,
            Some(_) => WriteBackCode::Discarded,
            None => WriteBackCode::Missing,
        }
    }

    /// Drops the trashed entry for `inode` once its write-back (a real
    /// delete, or a no-op discard) has been applied. Returns the chunk ids
    /// that were pinning the pending delete.
    pub fn mark_deleted_back(&self, inode: u64) -> Vec<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.trash.remove(&inode) else {
            return Vec::new();
        };
        inner.trash_name_index.remove(&slot.einode.name);
        slot.chunk_ids
    }

    /// Returns up to `limit` live entries starting at position `offset`,
    /// in the cache's current (unstable) order, plus the total live count.
    pub fn read_dir(&self, offset: usize, limit: usize) -> (Vec<Einode>, usize) {
        let inner = self.inner.lock().unwrap();
        let total = inner.order.len();
        let start = offset.min(total);
        let end = (start + limit).min(total);
        let entries = inner.order[start..end]
            .iter()
            .filter_map(|inode| inner.live.get(inode).map(|s| s.einode.clone()))
            .collect();
        (entries, total)
    }

    pub fn dirty_inodes(&self) -> Vec<u64> {
        let inner = self.inner.lock().unwrap();
        inner.live.iter().filter(|(_, s)| s.is_dirty()).map(|(&i, _)| i).collect()
    }

    pub fn trashed_inodes(&self) -> Vec<u64> {
        self.inner.lock().unwrap().trash.keys().copied().collect()
    }

    pub fn live_len(&self) -> usize {
        self.inner.lock().unwrap().live.len()
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
    fn a_freshly_created_entry_write_backs_as_a_create() {
        let entry = ParentEntry::new(1);
        entry.add_entry(7, einode(2, "a"));
        assert_eq!(entry.handle_write_back_update(2), WriteBackCode::Create);
        let cleared = entry.mark_written_back(2);
        assert_eq!(cleared, vec![7]);
        assert_eq!(entry.handle_write_back_update(2), WriteBackCode::Missing);
    }

    #[test]
    fn a_loaded_entry_updated_write_backs_as_a_plain_update() {
        let entry = ParentEntry::new(1);
        entry.load_entry(einode(2, "a"));
        assert_eq!(entry.handle_write_back_update(2), WriteBackCode::Missing);
        entry.rename(9, 2, "b").unwrap();
        assert_eq!(entry.handle_write_back_update(2), WriteBackCode::PlainUpdate);
        assert_eq!(entry.mark_written_back(2), vec![9]);
    }

    #[test]
    fn deleting_a_record_that_never_reached_the_backing_store_discards_silently() {
        let entry = ParentEntry::new(1);
        entry.add_entry(1, einode(2, "a"));
        entry.delete(2, 2);
        assert_eq!(entry.handle_write_back_delete(2), WriteBackCode::Discarded);
    }

    #[test]
    fn deleting_a_previously_persisted_record_requires_a_real_delete() {
        let entry = ParentEntry::new(1);
        entry.load_entry(einode(2, "a"));
        entry.delete(3, 2);
        assert_eq!(entry.handle_write_back_delete(2), WriteBackCode::DeleteAfter);
        assert_eq!(entry.mark_deleted_back(2), vec![3]);
        assert_eq!(entry.handle_write_back_delete(2), WriteBackCode::Missing);
    }

    #[test]
    fn a_trashed_child_reports_deleted_not_not_present() {
        let entry = ParentEntry::new(1);
        entry.load_entry(einode(2, "a"));
        entry.delete(4, 2);
        assert_eq!(entry.get(2), Presence::Deleted);
        assert_eq!(entry.lookup_by_object_name("a"), Presence::Deleted);
        assert_eq!(entry.get(999), Presence::NotPresent);
        assert_eq!(entry.lookup_by_object_name("nope"), Presence::NotPresent);
    }

    #[test]
    fn a_live_entry_shadows_a_trashed_name() {
        let entry = ParentEntry::new(1);
        entry.load_entry(einode(2, "a"));
        entry.delete(1, 2);
        entry.add_entry(2, einode(5, "a"));
        assert_eq!(entry.lookup_by_object_name("a").into_option().unwrap().inode, 5);
    }

    #[test]
    fn read_dir_survives_a_swap_and_pop_delete() {
        let entry = ParentEntry::new(1);
        entry.add_entry(1, einode(2, "a"));
        entry.add_entry(1, einode(3, "b"));
        entry.add_entry(1, einode(4, "c"));
        entry.delete(2, 3);
        let (page, total) = entry.read_dir(0, 10);
        assert_eq!(total, 2);
        let names: Vec<_> = page.iter().map(|e| e.name.clone()).collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"c".to_string()));
        assert!(!names.contains(&"b".to_string()));
    }

    #[test]
    fn move_from_trashes_here_and_move_to_adds_fresh_at_the_destination() {
        let src = ParentEntry::new(1);
        let dst = ParentEntry::new(2);
        src.load_entry(einode(5, "a"));
        let moved = src.move_from(1, 5).unwrap();
        assert_eq!(src.handle_write_back_delete(5), WriteBackCode::DeleteAfter);
        dst.move_to(2, moved);
        assert_eq!(dst.handle_write_back_update(5), WriteBackCode::Create);
        assert_eq!(dst.lookup_by_object_name("a").into_option().unwrap().inode, 5);
    }
}

//! C7 — Einode directory engine: every operation over the packed-einode
//! directory layout, built on the storage abstraction (C5) and the parent
//! cache (C6).
//!
//! Every mutating or scanning operation below takes the per-directory
//! object lock (via C5, which routes to C3) for its whole duration, so
//! record offsets observed at the start of an operation stay valid for the
//! rest of it. Nothing here is atomic *across* two directories — `move`
//! composes a delete and a write and relies on the caller's journal for
//! crash recovery.

use crate::constants::{readdir_records_per_msg, MAX_PARENT_HIERARCHY_DEPTH};
use crate::einode::{decode, encode, CreateAttributes, Einode, EINODE_RECORD_SIZE};
use crate::einode::parent_cache::ParentCache;
use crate::error::{Error, Result};
use crate::storage::abstraction::StorageAbstraction;
use std::sync::Arc;

fn directory_object_name(parent: u64) -> String {
    parent.to_string()
}

/// A single read-dir page: the records found and the directory's total
/// child count at the moment of the read.
pub struct ReadDirPage {
    pub entries: Vec<Einode>,
    pub dir_size: usize,
}

pub struct EinodeEngine {
    storage: Arc<StorageAbstraction>,
    parent_cache: Arc<ParentCache>,
    subtree_root: u64,
}

impl EinodeEngine {
    pub fn new(storage: Arc<StorageAbstraction>, parent_cache: Arc<ParentCache>, subtree_root: u64) -> Self {
        Self {
            storage,
            parent_cache,
            subtree_root,
        }
    }

    fn object_size(&self, parent: u64) -> Result<usize> {
        Ok(self.storage.size(self.subtree_root, &directory_object_name(parent))? as usize)
    }

    fn read_whole(&self, parent: u64) -> Result<Vec<Einode>> {
        let name = directory_object_name(parent);
        let size = self.storage.size(self.subtree_root, &name)? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.storage.read(self.subtree_root, &name, 0, size)?;
        let n = size / EINODE_RECORD_SIZE;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let mut rec = [0u8; EINODE_RECORD_SIZE];
            rec.copy_from_slice(&bytes[i * EINODE_RECORD_SIZE..(i + 1) * EINODE_RECORD_SIZE]);
            if let Some(e) = decode(&rec) {
                out.push(e);
            }
        }
        Ok(out)
    }

    fn read_slot(&self, parent: u64, offset: u64) -> Result<Option<Einode>> {
        let name = directory_object_name(parent);
        let size = self.storage.size(self.subtree_root, &name)?;
        if offset + EINODE_RECORD_SIZE as u64 > size {
            return Ok(None);
        }
        let bytes = self.storage.read(self.subtree_root, &name, offset, EINODE_RECORD_SIZE)?;
        let mut rec = [0u8; EINODE_RECORD_SIZE];
        rec.copy_from_slice(&bytes);
        Ok(decode(&rec))
    }

    fn write_slot(&self, parent: u64, offset: u64, e: &Einode, sync: bool) -> Result<()> {
        let name = directory_object_name(parent);
        let buf = encode(e)?;
        self.storage.write(self.subtree_root, &name, offset, &buf, sync)
    }

    fn truncate_by_one_record(&self, parent: u64, new_count: usize) -> Result<()> {
        let name = directory_object_name(parent);
        self.storage
            .truncate(self.subtree_root, &name, (new_count * EINODE_RECORD_SIZE) as u64)
    }

    /// Lookup by inode number: consults the parent cache; on a cache hit,
    /// reads the slot at the cached offset and verifies the inode matches;
    /// on a miss or mismatch, falls back to a linear scan of the cached
    /// parent's object.
    pub fn get_by_inode(&self, inode: u64) -> Result<Einode> {
        let (parent, offset) = self
            .parent_cache
            .get(inode)
            .ok_or_else(|| Error::parent_unknown(format!("no parent hint for inode {inode}")))?;
        if let Ok(Some(e)) = self.read_slot(parent, offset) {
            if e.inode == inode {
                return Ok(e);
            }
        }
        self.get_by_inode_in(parent, inode)
    }

    /// Lookup by `(parent, inode)` when the caller already knows the parent.
    pub fn get_by_inode_in(&self, parent: u64, inode: u64) -> Result<Einode> {
        let entries = self.read_whole(parent)?;
        let mut offset = 0u64;
        for e in &entries {
            if e.inode == inode {
                self.parent_cache.set(inode, parent, offset);
                return Ok(e.clone());
            }
            offset += EINODE_RECORD_SIZE as u64;
        }
        Err(Error::not_found(format!("inode {inode} not found under parent {parent}")))
    }

    /// Lookup by name: linear scan; on match, seeds the parent cache.
    pub fn get_by_name(&self, parent: u64, name: &str) -> Result<Einode> {
        let entries = self.read_whole(parent)?;
        let mut offset = 0u64;
        for e in &entries {
            if e.name == name {
                self.parent_cache.set(e.inode, parent, offset);
                return Ok(e.clone());
            }
            offset += EINODE_RECORD_SIZE as u64;
        }
        Err(Error::not_found(format!("{name:?} not found under parent {parent}")))
    }

    /// Unconditional append, no duplicate check. Used when the caller
    /// already knows the slot is fresh.
    pub fn create(&self, parent: u64, e: &Einode) -> Result<()> {
        self.create_batch(parent, std::slice::from_ref(e))
    }

    /// Batched append: issues all but the last write without a durability
    /// barrier, flushing only on the final entry.
    pub fn create_batch(&self, parent: u64, entries: &[Einode]) -> Result<()> {
        let mut offset = self.object_size(parent)? as u64;
        let last = entries.len().saturating_sub(1);
        for (i, e) in entries.iter().enumerate() {
            self.write_slot(parent, offset, e, i == last)?;
            self.parent_cache.set(e.inode, parent, offset);
            offset += EINODE_RECORD_SIZE as u64;
        }
        Ok(())
    }

    /// Write/overwrite with the uniqueness contract: if the parent cache has
    /// an offset for this inode and the record there matches name and
    /// inode, overwrite in place. Otherwise scan: a same-name record with a
    /// *different* inode fails `ConcurrentConflict`; a same-name
    /// same-inode record is overwritten; otherwise append and seed the
    /// cache.
    pub fn write(&self, parent: u64, e: &Einode) -> Result<()> {
        self.write_batch(parent, std::slice::from_ref(e))
    }

    pub fn write_batch(&self, parent: u64, entries: &[Einode]) -> Result<()> {
        let last = entries.len().saturating_sub(1);
        for (i, e) in entries.iter().enumerate() {
            let sync = i == last;
            if let Some((cached_parent, offset)) = self.parent_cache.get(e.inode) {
                if cached_parent == parent {
                    if let Ok(Some(existing)) = self.read_slot(parent, offset) {
                        if existing.name == e.name && existing.inode == e.inode {
                            self.write_slot(parent, offset, e, sync)?;
                            continue;
                        }
                    }
                }
            }
            let existing = self.read_whole(parent)?;
            let mut found_offset = None;
            let mut conflict = false;
            let mut off = 0u64;
            for existing_e in &existing {
                if existing_e.name == e.name {
                    if existing_e.inode != e.inode {
                        conflict = true;
                    } else {
                        found_offset = Some(off);
                    }
                    break;
                }
                off += EINODE_RECORD_SIZE as u64;
            }
            if conflict {
                return Err(Error::concurrent_conflict(format!(
                    "{:?} already exists under parent {parent} with a different inode",
                    e.name
                )));
            }
            match found_offset {
                Some(offset) => {
                    self.write_slot(parent, offset, e, sync)?;
                    self.parent_cache.set(e.inode, parent, offset);
                }
                None => {
                    let tail = (existing.len() as u64) * EINODE_RECORD_SIZE as u64;
                    self.write_slot(parent, tail, e, sync)?;
                    self.parent_cache.set(e.inode, parent, tail);
                }
            }
        }
        Ok(())
    }

    /// Deletes by `(parent, name)`: if the match is the last slot, truncate
    /// by one record; otherwise swap the last slot's record into the
    /// vacated one and truncate.
    pub fn delete_by_name(&self, parent: u64, name: &str) -> Result<()> {
        let mut entries = self.read_whole(parent)?;
        let idx = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::not_found(format!("{name:?} not found under parent {parent}")))?;
        self.delete_at_index(parent, &mut entries, idx)
    }

    /// Deletes by `(parent, inode)`.
    pub fn delete_by_inode_in(&self, parent: u64, inode: u64) -> Result<()> {
        let mut entries = self.read_whole(parent)?;
        let idx = entries
            .iter()
            .position(|e| e.inode == inode)
            .ok_or_else(|| Error::not_found(format!("inode {inode} not found under parent {parent}")))?;
        self.delete_at_index(parent, &mut entries, idx)
    }

    /// Deletes by inode alone: consults the parent cache to find the
    /// parent, then delegates.
    pub fn delete_by_inode(&self, inode: u64) -> Result<()> {
        let (parent, _) = self
            .parent_cache
            .get(inode)
            .ok_or_else(|| Error::parent_unknown(format!("no parent hint for inode {inode}")))?;
        self.delete_by_inode_in(parent, inode)
    }

    fn delete_at_index(&self, parent: u64, entries: &mut [Einode], idx: usize) -> Result<()> {
        let last = entries.len() - 1;
        let removed_inode = entries[idx].inode;
        if idx != last {
            let last_offset = idx as u64 * EINODE_RECORD_SIZE as u64;
            self.write_slot(parent, last_offset, &entries[last], false)?;
            self.parent_cache.set(entries[last].inode, parent, last_offset);
        }
        self.truncate_by_one_record(parent, last)?;
        self.parent_cache.delete(removed_inode);
        Ok(())
    }

    /// Returns up to `readdir_records_per_msg` records starting at `offset`,
    /// along with the total child count; primes the parent cache for every
    /// returned child.
    pub fn read_dir(&self, parent: u64, offset: usize) -> Result<ReadDirPage> {
        let entries = self.read_whole(parent)?;
        let dir_size = entries.len();
        let per_msg = readdir_records_per_msg(EINODE_RECORD_SIZE).max(1);
        let start = offset.min(dir_size);
        let end = (start + per_msg).min(dir_size);
        let mut page = Vec::with_capacity(end - start);
        for (i, e) in entries[start..end].iter().enumerate() {
            self.parent_cache
                .set(e.inode, parent, ((start + i) * EINODE_RECORD_SIZE) as u64);
            page.push(e.clone());
        }
        Ok(ReadDirPage {
            entries: page,
            dir_size,
        })
    }

    pub fn count_inodes(&self, parent: u64) -> Result<usize> {
        Ok(self.object_size(parent)? / EINODE_RECORD_SIZE)
    }

    /// Read-at-old, delete-at-old, write-at-new. Not atomic across parents.
    ///
    /// Rejects the move if `new_parent` is `inode` itself or a cached
    /// descendant of it, which would otherwise wire a directory underneath
    /// itself. This is a best-effort check: the walk only sees what the
    /// parent cache currently holds, so a cold-cache ancestor chain is not
    /// caught.
    pub fn move_inode(&self, inode: u64, old_parent: u64, new_parent: u64) -> Result<()> {
        if self.would_create_cycle(inode, new_parent) {
            return Err(Error::invalid_state(format!(
                "move would place inode {inode} under its own descendant {new_parent}"
            )));
        }
        let e = self.get_by_inode_in(old_parent, inode)?;
        self.delete_by_inode_in(old_parent, inode)?;
        self.write(new_parent, &e)
    }

    fn would_create_cycle(&self, inode: u64, new_parent: u64) -> bool {
        if new_parent == inode {
            return true;
        }
        let mut current = new_parent;
        for _ in 0..MAX_PARENT_HIERARCHY_DEPTH {
            if current == self.subtree_root {
                return false;
            }
            let Some((parent, _)) = self.parent_cache.get(current) else {
                return false;
            };
            if parent == inode {
                return true;
            }
            current = parent;
        }
        false
    }

    pub fn rename_in_place(&self, parent: u64, inode: u64, new_name: impl Into<String>) -> Result<()> {
        let mut e = self.get_by_inode_in(parent, inode)?;
        e.name = new_name.into();
        self.write(parent, &e)
    }

    /// Returns the parent of `inode` via the parent cache.
    pub fn get_parent(&self, inode: u64) -> Result<u64> {
        let (parent, _) = self
            .parent_cache
            .get(inode)
            .ok_or_else(|| Error::parent_unknown(format!("no parent hint for inode {inode}")))?;
        Ok(parent)
    }

    /// Walks parent pointers until the subtree root, returning them
    /// parent-first, bounded at `MAX_PARENT_HIERARCHY_DEPTH` entries.
    /// Truncation at the bound is a normal outcome, not an error.
    pub fn get_parent_hierarchy(&self, inode: u64) -> Result<Vec<u64>> {
        let mut hierarchy = Vec::new();
        let mut current = inode;
        for _ in 0..MAX_PARENT_HIERARCHY_DEPTH {
            if current == self.subtree_root {
                break;
            }
            let parent = self.get_parent(current)?;
            hierarchy.push(parent);
            if parent == self.subtree_root {
                break;
            }
            current = parent;
        }
        hierarchy.reverse();
        Ok(hierarchy)
    }

    /// Walks parent pointers to build the full path to `inode`.
    pub fn get_path(&self, inode: u64) -> Result<String> {
        if inode == self.subtree_root {
            return Ok("/".to_string());
        }
        let mut components = Vec::new();
        let mut current = inode;
        loop {
            let parent = self.get_parent(current)?;
            let entry = self.get_by_inode_in(parent, current)?;
            components.push(entry.name);
            if parent == self.subtree_root {
                break;
            }
            current = parent;
        }
        components.reverse();
        Ok(format!("/{}", components.join("/")))
    }

    /// Slash-split sequential lookup from the engine's subtree root; fails
    /// with `NotFound` on any missing component.
    pub fn resolv_path(&self, path: &str) -> Result<Einode> {
        let mut parent = self.subtree_root;
        let mut last: Option<Einode> = None;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let e = self.get_by_name(parent, component)?;
            parent = e.inode;
            last = Some(e);
        }
        last.ok_or_else(|| Error::not_found(format!("empty path {path:?}")))
    }

    pub fn make_create_einode(inode: u64, name: impl Into<String>, attrs: CreateAttributes) -> Einode {
        Einode::new(
            inode,
            name,
            crate::einode::Attributes {
                mode: attrs.mode,
                size: attrs.size,
                link_count: 1,
                uid: attrs.uid,
                gid: attrs.gid,
                atime: 0,
                mtime: 0,
                ctime: 0,
                has_acl: attrs.has_acl,
                layout_info: [0; crate::constants::LAYOUT_INFO_LEN],
            },
        )
    }
}

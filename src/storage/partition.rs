//! C2 — Partition: a mounted device owned by exactly one MDS, holding the
//! objects of exactly one subtree, with crash-safe state for long-running
//! operations.
//!
//! ```text
//! read_only ──(owner == local host)──▶ active
//!     ▲                                   │
//!     └─────────────(set_owner, other)────┘
//!     │
//!     ├──(start_migration / enlarge_subtree)──▶ migrating ──▶ active
//!     └──(reset)───────────────────────────────────────────▶ inactive
//! ```
//!
//! `partition_info` and `running_operation` are themselves just objects on
//! the partition's own device (C1), so every transition that must survive a
//! crash is written there *before* it becomes visible to peers.

use crate::constants::MAX_NAME_LEN;
use crate::error::{Error, ErrorKind, Result};
use crate::storage::device::StorageDevice;
use crate::storage::lock_table::ObjectLockTable;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

pub const PARTITION_INFO_OBJECT: &str = "partition_info";
pub const RUNNING_OPERATION_OBJECT: &str = "running_operation";
const OWNER_FIELD_LEN: usize = 16;
const DEVICE_FIELD_LEN: usize = 64;
const PARTITION_INFO_SIZE: usize = 8 + OWNER_FIELD_LEN + 4 + DEVICE_FIELD_LEN;
const RUNNING_OPERATION_RECORD_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Active,
    ReadOnly,
    Migrating,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningOp {
    None,
    StartedMigration,
    DeleteSubtree,
}

impl RunningOp {
    fn to_u32(self) -> u32 {
        match self {
            RunningOp::None => 0,
            RunningOp::StartedMigration => 1,
            RunningOp::DeleteSubtree => 2,
        }
    }
    fn from_u32(v: u32) -> RunningOp {
        match v {
            1 => RunningOp::StartedMigration,
            2 => RunningOp::DeleteSubtree,
            _ => RunningOp::None,
        }
    }
}

#[derive(Debug, Clone)]
struct PartitionInfo {
    root_inode: u64,
    owner: String,
    operation: RunningOp,
    migration_source: String,
}

impl Default for PartitionInfo {
    fn default() -> Self {
        Self {
            root_inode: 0,
            owner: String::new(),
            operation: RunningOp::None,
            migration_source: String::new(),
        }
    }
}

fn pack_fixed(s: &str, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn unpack_fixed(buf: &[u8]) -> String {
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..nul]).into_owned()
}

impl PartitionInfo {
    fn encode(&self) -> [u8; PARTITION_INFO_SIZE] {
        let mut buf = [0u8; PARTITION_INFO_SIZE];
        let mut off = 0;
        buf[off..off + 8].copy_from_slice(&self.root_inode.to_le_bytes());
        off += 8;
        buf[off..off + OWNER_FIELD_LEN].copy_from_slice(&pack_fixed(&self.owner, OWNER_FIELD_LEN));
        off += OWNER_FIELD_LEN;
        buf[off..off + 4].copy_from_slice(&self.operation.to_u32().to_le_bytes());
        off += 4;
        buf[off..off + DEVICE_FIELD_LEN]
            .copy_from_slice(&pack_fixed(&self.migration_source, DEVICE_FIELD_LEN));
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < PARTITION_INFO_SIZE {
            return None;
        }
        let mut off = 0;
        let mut arr8 = [0u8; 8];
        arr8.copy_from_slice(&buf[off..off + 8]);
        let root_inode = u64::from_le_bytes(arr8);
        off += 8;
        let owner = unpack_fixed(&buf[off..off + OWNER_FIELD_LEN]);
        off += OWNER_FIELD_LEN;
        let mut arr4 = [0u8; 4];
        arr4.copy_from_slice(&buf[off..off + 4]);
        let operation = RunningOp::from_u32(u32::from_le_bytes(arr4));
        off += 4;
        let migration_source = unpack_fixed(&buf[off..off + DEVICE_FIELD_LEN]);
        Some(Self {
            root_inode,
            owner,
            operation,
            migration_source,
        })
    }
}

/// A mounted subtree partition.
pub struct Partition {
    device: Arc<dyn StorageDevice>,
    local_host: String,
    host_rank: i32,
    total_hosts: i32,
    state: Mutex<PartitionState>,
    info: Mutex<PartitionInfo>,
    lock_table: ObjectLockTable,
}

impl Partition {
    /// Constructs a partition from its device. Mounts read-only first to
    /// recover the info object, then promotes to active iff owned locally.
    #[instrument(skip(device), fields(device = device.identifier()))]
    pub fn new(
        device: Arc<dyn StorageDevice>,
        local_host: impl Into<String>,
        host_rank: i32,
        total_hosts: i32,
    ) -> Result<Self> {
        let local_host = local_host.into();
        let info = if device.has(PARTITION_INFO_OBJECT)? {
            let bytes = device.read(PARTITION_INFO_OBJECT, 0, PARTITION_INFO_SIZE)?;
            PartitionInfo::decode(&bytes).unwrap_or_default()
        } else {
            PartitionInfo::default()
        };
        let state = if info.owner == local_host && !info.owner.is_empty() {
            PartitionState::Active
        } else {
            PartitionState::ReadOnly
        };
        info!(?state, owner = %info.owner, "partition mounted");
        Ok(Self {
            device,
            local_host,
            host_rank,
            total_hosts,
            state: Mutex::new(state),
            info: Mutex::new(info),
            lock_table: ObjectLockTable::new(),
        })
    }

    pub fn identifier(&self) -> &str {
        self.device.identifier()
    }

    pub fn state(&self) -> PartitionState {
        *self.state.lock().unwrap()
    }

    pub fn root_inode(&self) -> u64 {
        self.info.lock().unwrap().root_inode
    }

    pub fn owner(&self) -> String {
        self.info.lock().unwrap().owner.clone()
    }

    fn write_info(&self, info: &PartitionInfo) -> Result<()> {
        self.device
            .write(PARTITION_INFO_OBJECT, 0, &info.encode(), true)
    }

    pub fn set_root_inode(&self, root_inode: u64) -> Result<()> {
        let mut info = self.info.lock().unwrap();
        info.root_inode = root_inode;
        self.write_info(&info)
    }

    /// Requires `owner == local host`; remounts the device read-write.
    pub fn mount_rw(&self) -> Result<()> {
        let info = self.info.lock().unwrap();
        if info.owner != self.local_host {
            return Err(Error::ownership_violation(format!(
                "mount_rw: partition owned by {:?}, not {:?}",
                info.owner, self.local_host
            )));
        }
        *self.state.lock().unwrap() = PartitionState::Active;
        Ok(())
    }

    #[instrument(skip(self), fields(partition = self.identifier()))]
    pub fn set_owner(&self, owner: impl Into<String>) -> Result<()> {
        let owner = owner.into();
        let mut info = self.info.lock().unwrap();
        info.owner = owner.clone();
        self.write_info(&info)?;
        let mut state = self.state.lock().unwrap();
        if *state == PartitionState::Active && owner != self.local_host {
            *state = PartitionState::ReadOnly;
        } else if owner == self.local_host {
            *state = PartitionState::Active;
        }
        Ok(())
    }

    // --- object operations, all routed through the per-name lock table ---
    //
    // No delete-queue sits in front of these: `start_migration` and
    // `remove_subtree` run to completion before this partition is handed
    // back to callers, so there is no window where a concurrent
    // read/write/remove can race an in-flight migration the way a
    // multi-threaded servicing loop would need to account for. A build that
    // services object operations from other threads while `migrating` is
    // still in progress would need to queue removals of not-yet-copied
    // objects here and fall back to `source` on reads of them instead.

    pub fn read_object(&self, id: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let _g = self.lock_table.lock(id);
        self.device.read(id, offset, len)
    }

    pub fn write_object(&self, id: &str, offset: u64, data: &[u8], sync: bool) -> Result<()> {
        if self.state() == PartitionState::ReadOnly {
            return Err(Error::ownership_violation(format!(
                "write_object({id}): partition is read-only"
            )));
        }
        let _g = self.lock_table.lock(id);
        self.device.write(id, offset, data, sync)
    }

    pub fn truncate_object(&self, id: &str, len: u64) -> Result<()> {
        let _g = self.lock_table.lock(id);
        self.device.truncate(id, len)
    }

    pub fn object_size(&self, id: &str) -> Result<u64> {
        self.device.size(id)
    }

    /// Takes the object's lock for the check, same as every mutating
    /// operation, so a `has` that races a concurrent write or remove on the
    /// same name observes a consistent before-or-after state rather than a
    /// torn one. A separate has-then-read pair across two lock acquisitions
    /// is still not atomic; a caller needing that must hold the lock itself
    /// across both.
    pub fn has_object(&self, id: &str) -> Result<bool> {
        let _g = self.lock_table.lock(id);
        self.device.has(id)
    }

    pub fn remove_object(&self, id: &str) -> Result<()> {
        let _g = self.lock_table.lock(id);
        self.device.remove(id)
    }

    pub fn list_objects(&self) -> Result<Vec<String>> {
        self.device.list()
    }

    pub fn lock_object(&self, id: &str) -> crate::storage::lock_table::ObjectLockGuard<'_> {
        self.lock_table.lock(id)
    }

    // --- running-operation persistence ---

    fn write_running_operation(&self, names: &[String]) -> Result<()> {
        let mut buf = Vec::with_capacity(names.len() * RUNNING_OPERATION_RECORD_LEN);
        for name in names {
            buf.extend_from_slice(&pack_fixed(name, RUNNING_OPERATION_RECORD_LEN));
        }
        self.device.write(RUNNING_OPERATION_OBJECT, 0, &buf, true)
    }

    fn read_running_operation(&self) -> Result<Vec<String>> {
        let size = self.device.size(RUNNING_OPERATION_OBJECT)? as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        let buf = self
            .device
            .read(RUNNING_OPERATION_OBJECT, 0, size)?;
        let n = size / RUNNING_OPERATION_RECORD_LEN;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let rec = &buf[i * RUNNING_OPERATION_RECORD_LEN..(i + 1) * RUNNING_OPERATION_RECORD_LEN];
            out.push(unpack_fixed(rec));
        }
        Ok(out)
    }

    fn clear_running_operation(&self) -> Result<()> {
        self.device.remove(RUNNING_OPERATION_OBJECT)
    }

    /// Lists `source`'s objects reachable under `root`-equivalent scope
    /// (here: every object on the source device except `stop`), breadth
    /// first in name order. No cycle detection: this relies on directories
    /// forming a DAG, same as every other traversal in this module.
    pub fn list_subtree_objects(source: &Partition, stop: Option<&str>) -> Result<Vec<String>> {
        let mut names = source.list_objects()?;
        names.retain(|n| n != PARTITION_INFO_OBJECT && n != RUNNING_OPERATION_OBJECT);
        if let Some(stop) = stop {
            names.retain(|n| n != stop);
        }
        names.sort();
        Ok(names)
    }

    /// Migrates the subtree rooted at `root_inode` from `source` onto this
    /// (the destination) partition. Restartable: if a prior
    /// `started_migration` is already recorded, resumes from the persisted
    /// object list instead of re-enumerating.
    #[instrument(skip(self, source), fields(from = source.identifier(), to = self.identifier()))]
    pub fn start_migration(&self, source: &Partition, root_inode: u64) -> Result<()> {
        *self.state.lock().unwrap() = PartitionState::Migrating;
        let resuming = self.info.lock().unwrap().operation == RunningOp::StartedMigration;
        let objects = if resuming {
            debug!("resuming migration from persisted running-operation list");
            self.read_running_operation()?
        } else {
            let objects = Self::list_subtree_objects(source, None)?;
            self.write_running_operation(&objects)?;
            let mut info = self.info.lock().unwrap();
            info.operation = RunningOp::StartedMigration;
            info.migration_source = source.identifier().to_string();
            info.root_inode = root_inode;
            self.write_info(&info)?;
            objects
        };

        for name in &objects {
            let dest_has = self.has_object(name)?;
            let dest_size = self.object_size(name)?;
            let src_size = source.object_size(name)?;
            let needs_copy = !dest_has || dest_size != src_size;
            if needs_copy {
                let data = source.read_object(name, 0, src_size as usize)?;
                self.write_object(name, 0, &data, false)?;
            }
        }

        source.remove_subtree(root_inode, None)?;

        let mut info = self.info.lock().unwrap();
        info.operation = RunningOp::None;
        info.owner = self.local_host.clone();
        self.write_info(&info)?;
        drop(info);
        *self.state.lock().unwrap() = PartitionState::Active;
        self.clear_running_operation()?;
        info!("migration complete");
        Ok(())
    }

    /// Removes every object of the subtree rooted at `root`, skipping
    /// `stop` (used by `truncate_subtree` to preserve the new root).
    /// Idempotent: a second call with nothing persisted is a no-op.
    #[instrument(skip(self))]
    pub fn remove_subtree(&self, _root: u64, stop: Option<&str>) -> Result<()> {
        let pending = self.read_running_operation()?;
        let names = if pending.is_empty() {
            let names = Self::list_subtree_objects(self, stop)?;
            self.write_running_operation(&names)?;
            names
        } else {
            pending
        };
        for name in &names {
            self.remove_object(name)?;
        }
        self.clear_running_operation()?;
        Ok(())
    }

    /// Splits `new_root`'s subtree off by discarding everything from the old
    /// root except objects reachable under `new_root`.
    pub fn truncate_subtree(&self, new_root_object: &str) -> Result<()> {
        self.remove_subtree(0, Some(new_root_object))
    }

    /// Grows this partition to cover `new_root`, previously owned by
    /// `parent_partition`: re-roots this partition and migrates the
    /// subtree in from the parent, exactly as if `new_root` had been the
    /// migration target all along.
    #[instrument(skip(self, parent_partition), fields(from = parent_partition.identifier(), to = self.identifier()))]
    pub fn enlarge_subtree(&self, parent_partition: &Partition, new_root: u64) -> Result<()> {
        self.set_root_inode(new_root)?;
        self.start_migration(parent_partition, new_root)
    }

    /// Stable, locale-insensitive FNV-1a fold over the device identifier's
    /// bytes, used for the initial-ownership hash.
    pub fn calculate_ownership(device_id: &str, total_hosts: i32) -> i32 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in device_id.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % total_hosts.max(1) as u64) as i32
    }

    /// Claims this partition for the local host if it is currently
    /// unowned and the ownership hash selects this rank. Reshape only
    /// *claims* unowned devices; it never revokes an existing owner.
    pub fn recalculate_ownership(&self) -> Result<()> {
        let owner_is_empty = self.info.lock().unwrap().owner.is_empty();
        if !owner_is_empty {
            return Ok(());
        }
        let target_rank = Self::calculate_ownership(self.identifier(), self.total_hosts);
        if target_rank == self.host_rank {
            self.set_owner(self.local_host.clone())?;
        } else {
            warn!(device = self.identifier(), "partition claimed by a different rank; leaving unowned locally");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::device::FileStorageDevice;

    fn dev(root: &std::path::Path, id: &str) -> Arc<dyn StorageDevice> {
        Arc::new(FileStorageDevice::new(id, root.join(id)).unwrap())
    }

    #[test]
    fn starts_read_only_and_promotes_to_active_when_owned() {
        let dir = tempfile::tempdir().unwrap();
        let p = Partition::new(dev(dir.path(), "d0"), "host0", 0, 1).unwrap();
        assert_eq!(p.state(), PartitionState::ReadOnly);
        p.set_owner("host0").unwrap();
        assert_eq!(p.state(), PartitionState::Active);
    }

    #[test]
    fn active_iff_owner_matches_local_host() {
        let dir = tempfile::tempdir().unwrap();
        let p = Partition::new(dev(dir.path(), "d0"), "host0", 0, 2).unwrap();
        p.set_owner("host1").unwrap();
        assert_eq!(p.state(), PartitionState::ReadOnly);
    }

    #[test]
    fn writes_are_rejected_while_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let p = Partition::new(dev(dir.path(), "d0"), "host0", 0, 1).unwrap();
        assert!(p.write_object("x", 0, b"hi", true).is_err());
    }

    #[test]
    fn remove_subtree_twice_is_a_no_op_on_the_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let p = Partition::new(dev(dir.path(), "d0"), "host0", 0, 1).unwrap();
        p.set_owner("host0").unwrap();
        p.write_object("1", 0, b"abc", true).unwrap();
        p.remove_subtree(1, None).unwrap();
        assert!(!p.has_object("1").unwrap());
        p.remove_subtree(1, None).unwrap();
    }

    #[test]
    fn migration_copies_objects_and_removes_them_from_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = Partition::new(dev(dir.path(), "src"), "host0", 0, 2).unwrap();
        src.set_owner("host0").unwrap();
        src.write_object("1", 0, b"root-dir", true).unwrap();
        src.write_object("2", 0, b"child-dir", true).unwrap();

        let dst = Partition::new(dev(dir.path(), "dst"), "host1", 1, 2).unwrap();
        dst.start_migration(&src, 1).unwrap();

        assert_eq!(dst.state(), PartitionState::Active);
        assert_eq!(dst.read_object("1", 0, 8).unwrap(), b"root-dir");
        assert_eq!(dst.read_object("2", 0, 9).unwrap(), b"child-dir");
        assert!(!src.has_object("1").unwrap());
        assert!(!src.has_object("2").unwrap());
    }

    #[test]
    fn migration_resumes_from_a_persisted_running_operation_after_a_simulated_crash() {
        let dir = tempfile::tempdir().unwrap();
        let src = Partition::new(dev(dir.path(), "src"), "host0", 0, 2).unwrap();
        src.set_owner("host0").unwrap();
        src.write_object("1", 0, b"root-dir", true).unwrap();
        src.write_object("2", 0, b"child-dir", true).unwrap();

        let dst = Partition::new(dev(dir.path(), "dst"), "host1", 1, 2).unwrap();
        // Stage exactly what start_migration's non-resuming branch persists
        // before copying anything, then abandon this handle without
        // copying a single object — the "crash".
        let objects = Partition::list_subtree_objects(&src, None).unwrap();
        dst.write_running_operation(&objects).unwrap();
        {
            let mut info = dst.info.lock().unwrap();
            info.operation = RunningOp::StartedMigration;
            info.migration_source = src.identifier().to_string();
            dst.write_info(&info).unwrap();
        }
        drop(dst);

        // Reconstruct, as a process restart would, and resume.
        let dst = Partition::new(dev(dir.path(), "dst"), "host1", 1, 2).unwrap();
        dst.start_migration(&src, 1).unwrap();

        assert_eq!(dst.state(), PartitionState::Active);
        assert_eq!(dst.root_inode(), 1);
        assert_eq!(dst.read_object("1", 0, 8).unwrap(), b"root-dir");
        assert_eq!(dst.read_object("2", 0, 9).unwrap(), b"child-dir");
        assert!(!src.has_object("1").unwrap());
        assert!(!src.has_object("2").unwrap());
    }

    #[test]
    fn enlarge_subtree_re_roots_and_migrates_from_the_parent_partition() {
        let dir = tempfile::tempdir().unwrap();
        let parent = Partition::new(dev(dir.path(), "parent"), "host0", 0, 2).unwrap();
        parent.set_owner("host0").unwrap();
        parent.write_object("5", 0, b"new-root-dir", true).unwrap();
        parent.write_object("6", 0, b"new-root-child", true).unwrap();

        let grown = Partition::new(dev(dir.path(), "grown"), "host1", 1, 2).unwrap();
        grown.enlarge_subtree(&parent, 5).unwrap();

        assert_eq!(grown.state(), PartitionState::Active);
        assert_eq!(grown.root_inode(), 5);
        assert_eq!(grown.read_object("5", 0, 12).unwrap(), b"new-root-dir");
        assert_eq!(grown.read_object("6", 0, 14).unwrap(), b"new-root-child");
        assert!(!parent.has_object("5").unwrap());
        assert!(!parent.has_object("6").unwrap());
    }

    #[test]
    fn calculate_ownership_is_stable_for_a_given_device_id() {
        let a = Partition::calculate_ownership("dev-a", 4);
        let b = Partition::calculate_ownership("dev-a", 4);
        assert_eq!(a, b);
        assert!(a >= 0 && a < 4);
    }
}

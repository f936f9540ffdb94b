//! C8 — Inode-number distributor: partitions the 64-bit inode-number space
//! by MDS rank, with lazy on-disk checkpointing of the allocation watermark.
//!
//! Rank `r` owns `(r*2^48, (r+1)*2^48)`, exclusive at both ends so neither
//! `0` (invalid) nor a rank boundary is ever handed out, and `1` (the
//! file-system root) is skipped explicitly. The fast path — bumping an
//! in-memory counter — never touches storage; only crossing a checkpoint
//! interval does.

use crate::constants::{FS_ROOT_INODE_NUMBER, INODE_ALLOCATION_INTERVAL, PARTITION_OFFSET_BYTES};
use crate::error::{Error, Result};
use crate::storage::abstraction::StorageAbstraction;
use std::sync::Mutex;

fn checkpoint_object_name(rank: i32) -> String {
    format!("inode_allocation_{rank}")
}

fn band_bounds(rank: i32) -> (u64, u64) {
    let band_bits = 64 - PARTITION_OFFSET_BYTES * 8;
    let band_size = 1u64 << band_bits;
    let low = rank as u64 * band_size;
    (low, low + band_size)
}

struct State {
    last_number: u64,
    last_written_number: u64,
}

pub struct InodeNumberDistributor {
    rank: i32,
    limit: u64,
    state: Mutex<State>,
}

impl InodeNumberDistributor {
    /// Recovers the watermark from the checkpoint object (scanning both
    /// storage modes is the caller's job via `storage`); absent checkpoint
    /// starts the band at its low bound.
    pub fn new(storage: &StorageAbstraction, rank: i32) -> Result<Self> {
        let (low, high) = band_bounds(rank);
        let name = checkpoint_object_name(rank);
        let start = if storage.has(0, &name)? {
            let size = storage.size(0, &name)? as usize;
            let buf = storage.read(0, &name, 0, size)?;
            if buf.len() >= 12 {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&buf[4..12]);
                u64::from_le_bytes(arr)
            } else {
                low
            }
        } else {
            low
        };
        Ok(Self {
            rank,
            limit: high,
            state: Mutex::new(State {
                last_number: start,
                last_written_number: start,
            }),
        })
    }

    /// Constructs a distributor with an explicit limit, for exhaustion
    /// tests and for any rank not wired to shared durable storage yet.
    pub fn with_limit(rank: i32, start: u64, limit: u64) -> Self {
        Self {
            rank,
            limit,
            state: Mutex::new(State {
                last_number: start,
                last_written_number: start,
            }),
        }
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    fn write_checkpoint(&self, storage: &StorageAbstraction, value: u64) -> Result<()> {
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&(self.rank as u32).to_le_bytes());
        buf[4..12].copy_from_slice(&value.to_le_bytes());
        storage.write(0, &checkpoint_object_name(self.rank), 0, &buf, true)
    }

    /// Allocates the next inode number in this rank's band, skipping `1`
    /// (the synthesized root), and advancing the durable checkpoint every
    /// `INODE_ALLOCATION_INTERVAL` numbers.
    pub fn next(&self, storage: &StorageAbstraction) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.last_number + 1 >= self.limit {
                return Err(Error::exhausted(format!(
                    "rank {} inode-number band exhausted",
                    self.rank
                )));
            }
            if state.last_number >= state.last_written_number {
                let new_watermark =
                    (state.last_written_number + INODE_ALLOCATION_INTERVAL).min(self.limit);
                self.write_checkpoint(storage, new_watermark)?;
                state.last_written_number = new_watermark;
            }
            state.last_number += 1;
            let candidate = state.last_number;
            if candidate != FS_ROOT_INODE_NUMBER {
                return Ok(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::device::FileStorageDevice;
    use std::sync::Arc;

    fn storage() -> (tempfile::TempDir, StorageAbstraction) {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(FileStorageDevice::new("dev0", dir.path()).unwrap());
        (dir, StorageAbstraction::file_based(device))
    }

    #[test]
    fn never_hands_out_the_root_inode_and_is_strictly_increasing() {
        let (_dir, storage) = storage();
        let dist = InodeNumberDistributor::with_limit(0, 0, 10_000);
        let mut seen = Vec::new();
        for _ in 0..20 {
            let n = dist.next(&storage).unwrap();
            assert_ne!(n, FS_ROOT_INODE_NUMBER);
            if let Some(&last) = seen.last() {
                assert!(n > last);
            }
            seen.push(n);
        }
    }

    #[test]
    fn fails_with_exhausted_at_the_limit_and_state_does_not_advance() {
        let (_dir, storage) = storage();
        let dist = InodeNumberDistributor::with_limit(0, 5, 7);
        assert_eq!(dist.next(&storage).unwrap(), 6);
        assert!(dist.next(&storage).is_err());
        assert!(dist.next(&storage).is_err());
    }

    #[test]
    fn checkpoint_advances_by_the_configured_interval() {
        let (_dir, storage) = storage();
        let dist = InodeNumberDistributor::with_limit(2, 0, 1 << 20);
        dist.next(&storage).unwrap();
        let name = checkpoint_object_name(2);
        assert!(storage.has(0, &name).unwrap());
        let buf = storage.read(0, &name, 0, 12).unwrap();
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&buf[4..12]);
        assert_eq!(u64::from_le_bytes(arr), INODE_ALLOCATION_INTERVAL);
    }
}

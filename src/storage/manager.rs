//! C4 — Partition manager: owns all local partitions, finds one by
//! subtree-root or device id, allocates free partitions, recomputes
//! ownership on fleet reshape.

use crate::error::{Error, Result};
use crate::storage::partition::Partition;
use std::sync::Arc;

pub struct PartitionManager {
    partitions: Vec<Arc<Partition>>,
    host_identifier: String,
    host_rank: i32,
    total_hosts: i32,
}

impl PartitionManager {
    pub fn new(
        partitions: Vec<Arc<Partition>>,
        host_identifier: impl Into<String>,
        host_rank: i32,
        total_hosts: i32,
    ) -> Self {
        Self {
            partitions,
            host_identifier: host_identifier.into(),
            host_rank,
            total_hosts,
        }
    }

    pub fn host_identifier(&self) -> &str {
        &self.host_identifier
    }

    pub fn partitions(&self) -> &[Arc<Partition>] {
        &self.partitions
    }

    /// Linear scan is acceptable: bounded by devices per host.
    pub fn get_partition(&self, root_inode: u64) -> Option<Arc<Partition>> {
        self.partitions
            .iter()
            .find(|p| p.root_inode() == root_inode)
            .cloned()
    }

    pub fn get_partition_by_identifier(&self, identifier: &str) -> Result<Arc<Partition>> {
        self.partitions
            .iter()
            .find(|p| p.identifier() == identifier)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no partition with identifier {identifier:?}")))
    }

    /// First locally-owned partition with no root inode assigned yet.
    pub fn get_free_owned_partition(&self) -> Result<Arc<Partition>> {
        self.partitions
            .iter()
            .find(|p| p.owner() == self.host_identifier && p.root_inode() == 0)
            .cloned()
            .ok_or_else(|| Error::storage_failure("no free owned partitions"))
    }

    /// Hook for a remote free-partition placeholder; not populated in this
    /// design. Downstream behaviour on a genuine remote-free request is
    /// left to whatever calls this, since there is no remote partition
    /// lookup to satisfy it yet.
    pub fn get_free_remote_partition(&self) -> Option<Arc<Partition>> {
        None
    }

    pub fn get_free_partition(&self) -> Result<Arc<Partition>> {
        self.get_free_owned_partition()
            .or_else(|_| {
                self.get_free_remote_partition()
                    .ok_or_else(|| Error::storage_failure("no free partitions"))
            })
    }

    pub fn recalculate_ownerships(&self) -> Result<()> {
        for p in &self.partitions {
            p.recalculate_ownership()?;
        }
        Ok(())
    }

    pub fn host_rank(&self) -> i32 {
        self.host_rank
    }

    pub fn total_hosts(&self) -> i32 {
        self.total_hosts
    }
}

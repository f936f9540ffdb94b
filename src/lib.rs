//! A distributed parallel-filesystem metadata server core.
//!
//! Directories are stored as packed arrays of [`einode`] records rather
//! than a separate name table plus inode table. [`storage`] is the object
//! store underneath them, partitioned by subtree and owned one host at a
//! time; [`cache`] is the write-back layer that keeps hot directories in
//! memory; [`inode_alloc`] hands out fresh inode numbers from this rank's
//! band; [`ownership`] is the participant side of the protocol that moves
//! a partition from one host to another.
//!
//! [`MetadataServer`] wires all of it together from a [`config::Config`]
//! for the [`mdsd`](../bin/mdsd.rs) binary; library consumers that only
//! need a subset of the stack can construct the pieces directly instead.

pub mod cache;
pub mod config;
pub mod constants;
pub mod einode;
pub mod error;
pub mod inode_alloc;
pub mod lru;
pub mod ownership;
pub mod storage;

use crate::cache::inode_cache::InodeCache;
use crate::config::{Config, StorageMode};
use crate::einode::engine::EinodeEngine;
use crate::einode::parent_cache::ParentCache;
use crate::error::Result;
use crate::inode_alloc::InodeNumberDistributor;
use crate::ownership::ChangeOwnershipAdapter;
use crate::storage::abstraction::StorageAbstraction;
use crate::storage::device::{FileStorageDevice, StorageDevice};
use crate::storage::manager::PartitionManager;
use crate::storage::partition::Partition;
use std::sync::Arc;

/// Everything one host needs to serve its share of the namespace: the
/// storage façade, the (optional, partition-mode-only) partition manager
/// and change-ownership adapter, the parent-offset hint cache, the
/// write-back inode cache, and this rank's inode-number distributor.
pub struct MetadataServer {
    pub storage: Arc<StorageAbstraction>,
    pub partition_manager: Option<Arc<PartitionManager>>,
    pub ownership: Option<Arc<ChangeOwnershipAdapter>>,
    pub parent_cache: Arc<ParentCache>,
    pub inode_cache: Arc<InodeCache>,
    pub inode_alloc: Arc<InodeNumberDistributor>,
    pub config: Config,
}

impl MetadataServer {
    /// Assembles the storage layer from `config.storage_mode`, recovers
    /// each local partition's persisted state, and recalculates ownership
    /// over any still-unclaimed device before returning.
    pub fn bootstrap(config: Config) -> Result<Self> {
        let (storage, partition_manager, ownership) = match config.storage_mode {
            StorageMode::File => {
                let device = Arc::new(FileStorageDevice::new(
                    config.host_identifier.clone(),
                    config.mount_directory.clone(),
                )?);
                (Arc::new(StorageAbstraction::file_based(device)), None, None)
            }
            StorageMode::Partition => {
                let mut partitions = Vec::with_capacity(config.devices.len());
                for device_id in &config.devices {
                    let root = config.mount_directory.join(device_id);
                    let device: Arc<dyn StorageDevice> = Arc::new(FileStorageDevice::new(device_id.clone(), root)?);
                    partitions.push(Arc::new(Partition::new(
                        device,
                        config.host_identifier.clone(),
                        config.host_rank,
                        config.total_hosts,
                    )?));
                }
                let manager = Arc::new(PartitionManager::new(
                    partitions,
                    config.host_identifier.clone(),
                    config.host_rank,
                    config.total_hosts,
                ));
                manager.recalculate_ownerships()?;
                let storage = Arc::new(StorageAbstraction::partition_based(manager.clone()));
                let ownership = Arc::new(ChangeOwnershipAdapter::new(manager.clone()));
                (storage, Some(manager), Some(ownership))
            }
        };

        let inode_alloc = Arc::new(InodeNumberDistributor::new(&storage, config.host_rank)?);

        Ok(Self {
            storage,
            partition_manager,
            ownership,
            parent_cache: Arc::new(ParentCache::new()),
            inode_cache: Arc::new(InodeCache::new()),
            inode_alloc,
            config,
        })
    }

    /// Builds an einode engine over the subtree rooted at `subtree_root`,
    /// sharing this server's storage façade and parent-offset cache.
    pub fn engine_for(&self, subtree_root: u64) -> EinodeEngine {
        EinodeEngine::new(self.storage.clone(), self.parent_cache.clone(), subtree_root)
    }
}

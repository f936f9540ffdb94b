//! C11 — Change-ownership adapter: the participant side of the external
//! two-phase, ordered distributed-atomic-operation protocol used to hand a
//! partition from one host to another.
//!
//! The protocol's `source`/`target` naming is about where the device's
//! ownership record points before and after, not about who does the work:
//! the actual provisioning (remounting the partition read-write and
//! stamping the new owner) happens on the **target** host, triggered once
//! its identifier stops matching `source` in the operation record. A host
//! is the coordinator for an operation iff it is that operation's target.

use crate::error::{Error, Result};
use crate::storage::manager::PartitionManager;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// One change-ownership operation, as delivered by the external protocol.
#[derive(Debug, Clone)]
pub struct ChangeOwnershipOperation {
    pub device_identifier: String,
    pub source: String,
    pub target: String,
}

/// Dependency-injected: no static singleton, so tests can run more than one
/// adapter against independent managers in the same process.
pub struct ChangeOwnershipAdapter {
    manager: Arc<PartitionManager>,
    sending_addresses: Mutex<Vec<String>>,
}

impl ChangeOwnershipAdapter {
    pub fn new(manager: Arc<PartitionManager>) -> Self {
        Self {
            manager,
            sending_addresses: Mutex::new(Vec::new()),
        }
    }

    /// True iff the local host is this operation's target, i.e. the host
    /// responsible for provisioning and for driving the protocol forward.
    pub fn is_coordinator(&self, op: &ChangeOwnershipOperation) -> bool {
        self.manager.host_identifier() == op.target
    }

    /// Sets the peer addresses the protocol should notify as the operation
    /// advances (source and any observers). Overwrites any previous set.
    pub fn set_sending_addresses(&self, addresses: Vec<String>) {
        *self.sending_addresses.lock().unwrap() = addresses;
    }

    pub fn sending_addresses(&self) -> Vec<String> {
        self.sending_addresses.lock().unwrap().clone()
    }

    fn require_coordinator(&self, op: &ChangeOwnershipOperation) -> Result<()> {
        if !self.is_coordinator(op) {
            return Err(Error::invalid_state(format!(
                "handle_operation_request for {:?} observed on {:?}, not target {:?}",
                op.device_identifier,
                self.manager.host_identifier(),
                op.target
            )));
        }
        Ok(())
    }

    /// Request phase, run on the target host: remounts the named partition
    /// read-write and stamps it as owned locally.
    #[instrument(skip(self), fields(device = %op.device_identifier, source = %op.source, target = %op.target))]
    pub fn handle_operation_request(&self, op: &ChangeOwnershipOperation) -> Result<()> {
        self.require_coordinator(op)?;
        let partition = self.manager.get_partition_by_identifier(&op.device_identifier)?;
        partition.set_owner(op.target.clone())?;
        partition.mount_rw()
    }

    /// Re-delivery of the request phase (the coordinator crashed or a
    /// message was lost). Setting ownership and remounting are both
    /// idempotent, so this just replays the request.
    pub fn handle_operation_rerequest(&self, op: &ChangeOwnershipOperation) -> Result<()> {
        self.handle_operation_request(op)
    }

    /// Undo phase: the operation was aborted before the protocol committed.
    /// Restores ownership to `source` and leaves the partition read-only on
    /// the target, which `Partition::set_owner` already does when the new
    /// owner isn't the local host.
    #[instrument(skip(self), fields(device = %op.device_identifier, source = %op.source, target = %op.target))]
    pub fn handle_operation_undo_request(&self, op: &ChangeOwnershipOperation) -> Result<()> {
        self.require_coordinator(op)?;
        let partition = self.manager.get_partition_by_identifier(&op.device_identifier)?;
        partition.set_owner(op.source.clone())
    }

    /// Re-delivery of the undo phase.
    pub fn handle_operation_reundo_request(&self, op: &ChangeOwnershipOperation) -> Result<()> {
        self.handle_operation_undo_request(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::device::FileStorageDevice;
    use crate::storage::partition::Partition;

    fn adapter(host: &str, rank: i32, total: i32, dir: &std::path::Path) -> ChangeOwnershipAdapter {
        let device = Arc::new(FileStorageDevice::new("dev0", dir.join("dev0")).unwrap());
        let partition = Arc::new(Partition::new(device, host, rank, total).unwrap());
        let manager = Arc::new(PartitionManager::new(vec![partition], host, rank, total));
        ChangeOwnershipAdapter::new(manager)
    }

    fn op() -> ChangeOwnershipOperation {
        ChangeOwnershipOperation {
            device_identifier: "dev0".to_string(),
            source: "host0".to_string(),
            target: "host1".to_string(),
        }
    }

    #[test]
    fn only_the_target_host_is_the_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let source_side = adapter("host0", 0, 2, dir.path());
        let target_side = adapter("host1", 1, 2, dir.path());
        assert!(!source_side.is_coordinator(&op()));
        assert!(target_side.is_coordinator(&op()));
    }

    #[test]
    fn handle_operation_request_is_rejected_off_the_target_host() {
        let dir = tempfile::tempdir().unwrap();
        let source_side = adapter("host0", 0, 2, dir.path());
        assert!(source_side.handle_operation_request(&op()).is_err());
    }

    #[test]
    fn handle_operation_request_on_the_target_claims_and_remounts_the_partition() {
        let dir = tempfile::tempdir().unwrap();
        let target_side = adapter("host1", 1, 2, dir.path());
        target_side.handle_operation_request(&op()).unwrap();
        let partition = target_side.manager.get_partition_by_identifier("dev0").unwrap();
        assert_eq!(partition.owner(), "host1");
        assert_eq!(partition.state(), crate::storage::partition::PartitionState::Active);
    }

    #[test]
    fn rerequest_after_request_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target_side = adapter("host1", 1, 2, dir.path());
        target_side.handle_operation_request(&op()).unwrap();
        target_side.handle_operation_rerequest(&op()).unwrap();
    }

    #[test]
    fn undo_restores_ownership_to_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let target_side = adapter("host1", 1, 2, dir.path());
        target_side.handle_operation_request(&op()).unwrap();
        target_side.handle_operation_undo_request(&op()).unwrap();
        let partition = target_side.manager.get_partition_by_identifier("dev0").unwrap();
        assert_eq!(partition.owner(), "host0");
    }
}

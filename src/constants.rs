//! Design-time constants from the persistent layout and frame budget.
//!
//! These are not runtime tunables: changing any of them changes the on-disk
//! format of an existing deployment.

/// Maximum length of an einode name, not counting the terminator.
pub const MAX_NAME_LEN: usize = 255;
/// Maximum length of a resolved path.
pub const MAX_PATH_LEN: usize = 1024;
/// Number of high bytes of an inode number reserved for the rank band.
pub const PARTITION_OFFSET_BYTES: u32 = 2;
/// How many inode numbers are checkpointed to disk at once.
pub const INODE_ALLOCATION_INTERVAL: u64 = 1024;
/// Bound on the number of entries held in the parent cache (C6).
pub const PARENT_CACHE_CAPACITY: usize = 4096;
/// Bytes of opaque layout info carried by each einode's inode payload.
pub const LAYOUT_INFO_LEN: usize = 256;
/// External RPC frame budget in bytes; bounds how many einode records a
/// single `read_dir` response may carry.
pub const FSAL_MSG_LEN: usize = 608;
/// Inode number reserved for the file-system root; it has no persistent
/// einode and is synthesized on demand.
pub const FS_ROOT_INODE_NUMBER: u64 = 1;
/// Inode number reserved to mean "invalid" / "no parent".
pub const INVALID_INODE_ID: u64 = 0;
/// Bound on the length of `get_parent_hierarchy`'s walk; truncation is a
/// normal outcome, not an error.
pub const MAX_PARENT_HIERARCHY_DEPTH: usize = 32;

/// `records * record_size <= FSAL_MSG_LEN`, computed for the concrete
/// on-disk einode record defined in [`crate::einode::EINODE_RECORD_SIZE`].
pub const fn readdir_records_per_msg(record_size: usize) -> usize {
    FSAL_MSG_LEN / record_size
}

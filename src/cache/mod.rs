//! Write-back inode cache: [`parent_entry`] (C9) caches one directory's
//! children; [`inode_cache`] (C10) is the shared top-level index over all
//! of them.

pub mod inode_cache;
pub mod parent_entry;

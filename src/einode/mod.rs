//! # Embedded inodes.
//!
//! An **einode** is a directory entry that carries both a name and the full
//! inode payload inline, in a single packed record. A directory is then just
//! an array of these records living in one storage object — there is no
//! separate inode table to cross-reference. [`engine`] implements the
//! operations over that layout; [`parent_cache`] is the offset hint that
//! lets most lookups skip the linear scan.
//!
//! ```text
//! directory object (name = decimal parent inode number)
//! ┌───────────────┬───────────────┬───────────────┬─────
//! │ EinodeRecord 0 │ EinodeRecord 1 │ EinodeRecord 2 │ ...
//! └───────────────┴───────────────┴───────────────┴─────
//! ```
//!
//! Record order is an artifact of the swap-and-pop delete strategy, not a
//! contract: nothing outside this module may assume a record's index is
//! stable across a mutation.

pub mod engine;
pub mod parent_cache;

use crate::constants::{LAYOUT_INFO_LEN, MAX_NAME_LEN};
use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Which fields of an [`Attributes`] an `update_attributes_request`
    /// actually changed, mirroring the `*_SET` bitfield family the original
    /// wire format used to avoid shipping every field on every update.
    #[derive(Default)]
    pub struct UpdateMask: u32 {
        const MODE    = 0b0000_0001;
        const CTIME   = 0b0000_0010;
        const MTIME   = 0b0000_0100;
        const SIZE    = 0b0000_1000;
        const ATIME   = 0b0001_0000;
        const NLINK   = 0b0010_0000;
        const HAS_ACL = 0b0100_0000;
        const UID     = 0b1000_0000;
        const GID     = 0b1_0000_0000;
    }
}

/// The inode payload carried inline by every einode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub mode: u32,
    pub size: u64,
    pub link_count: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub has_acl: bool,
    /// Opaque layout info, passed through verbatim (striping hints, ACL
    /// blobs, whatever the external layers stash here).
    pub layout_info: [u8; LAYOUT_INFO_LEN],
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            mode: 0,
            size: 0,
            link_count: 1,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            has_acl: false,
            layout_info: [0; LAYOUT_INFO_LEN],
        }
    }
}

impl Attributes {
    /// Applies the subset of `other`'s fields named by `mask` onto `self`.
    pub fn apply_update(&mut self, other: &Attributes, mask: UpdateMask) {
        if mask.contains(UpdateMask::MODE) {
            self.mode = other.mode;
        }
        if mask.contains(UpdateMask::CTIME) {
            self.ctime = other.ctime;
        }
        if mask.contains(UpdateMask::MTIME) {
            self.mtime = other.mtime;
        }
        if mask.contains(UpdateMask::SIZE) {
            self.size = other.size;
        }
        if mask.contains(UpdateMask::ATIME) {
            self.atime = other.atime;
        }
        if mask.contains(UpdateMask::NLINK) {
            self.link_count = other.link_count;
        }
        if mask.contains(UpdateMask::HAS_ACL) {
            self.has_acl = other.has_acl;
        }
        if mask.contains(UpdateMask::UID) {
            self.uid = other.uid;
        }
        if mask.contains(UpdateMask::GID) {
            self.gid = other.gid;
        }
    }
}

/// Attributes supplied at creation time (no link_count / acl yet).
#[derive(Debug, Clone, Copy)]
pub struct CreateAttributes {
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub has_acl: bool,
}

/// An einode: a directory entry carrying its own inode payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Einode {
    pub inode: u64,
    pub name: String,
    pub attrs: Attributes,
}

impl Einode {
    pub fn new(inode: u64, name: impl Into<String>, attrs: Attributes) -> Self {
        Self {
            inode,
            name: name.into(),
            attrs,
        }
    }
}

/// Fixed on-disk size of one einode record: the inode payload plus a
/// 255-byte null-padded name suffix. Stable for the lifetime of the format.
pub const EINODE_RECORD_SIZE: usize = 8 // inode
    + 4 // mode
    + 8 // size
    + 4 // link_count
    + 4 // uid
    + 4 // gid
    + 8 // atime
    + 8 // mtime
    + 8 // ctime
    + 1 // has_acl
    + LAYOUT_INFO_LEN
    + MAX_NAME_LEN;

/// Packs an einode into its fixed-size on-disk record.
pub fn encode(e: &Einode) -> Result<[u8; EINODE_RECORD_SIZE]> {
    if e.name.as_bytes().len() >= MAX_NAME_LEN {
        return Err(Error::invalid_state(format!(
            "name {:?} exceeds MAX_NAME_LEN",
            e.name
        )));
    }
    let mut buf = [0u8; EINODE_RECORD_SIZE];
    let mut off = 0usize;
    macro_rules! put {
        ($val:expr, $ty:ty) => {{
            let bytes = <$ty>::to_le_bytes($val);
            buf[off..off + bytes.len()].copy_from_slice(&bytes);
            off += bytes.len();
        }};
    }
    put!(e.inode, u64);
    put!(e.attrs.mode, u32);
    put!(e.attrs.size, u64);
    put!(e.attrs.link_count, u32);
    put!(e.attrs.uid, u32);
    put!(e.attrs.gid, u32);
    put!(e.attrs.atime, i64);
    put!(e.attrs.mtime, i64);
    put!(e.attrs.ctime, i64);
    buf[off] = e.attrs.has_acl as u8;
    off += 1;
    buf[off..off + LAYOUT_INFO_LEN].copy_from_slice(&e.attrs.layout_info);
    off += LAYOUT_INFO_LEN;
    let name_bytes = e.name.as_bytes();
    buf[off..off + name_bytes.len()].copy_from_slice(name_bytes);
    Ok(buf)
}

/// Unpacks a fixed-size on-disk record into an einode.
///
/// Returns `None` if the slot is all zero (treated as a hole, never produced
/// by this crate but tolerated for defensive reads of foreign layouts).
pub fn decode(buf: &[u8; EINODE_RECORD_SIZE]) -> Option<Einode> {
    let mut off = 0usize;
    macro_rules! take {
        ($ty:ty) => {{
            let size = std::mem::size_of::<$ty>();
            let mut arr = [0u8; std::mem::size_of::<$ty>()];
            arr.copy_from_slice(&buf[off..off + size]);
            off += size;
            <$ty>::from_le_bytes(arr)
        }};
    }
    let inode = take!(u64);
    if inode == 0 {
        return None;
    }
    let mode = take!(u32);
    let size = take!(u64);
    let link_count = take!(u32);
    let uid = take!(u32);
    let gid = take!(u32);
    let atime = take!(i64);
    let mtime = take!(i64);
    let ctime = take!(i64);
    let has_acl = buf[off] != 0;
    off += 1;
    let mut layout_info = [0u8; LAYOUT_INFO_LEN];
    layout_info.copy_from_slice(&buf[off..off + LAYOUT_INFO_LEN]);
    off += LAYOUT_INFO_LEN;
    let name_bytes = &buf[off..off + MAX_NAME_LEN];
    let nul = name_bytes.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
    let name = String::from_utf8_lossy(&name_bytes[..nul]).into_owned();
    Some(Einode {
        inode,
        name,
        attrs: Attributes {
            mode,
            size,
            link_count,
            uid,
            gid,
            atime,
            mtime,
            ctime,
            has_acl,
            layout_info,
        },
    })
}

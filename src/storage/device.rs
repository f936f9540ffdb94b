//! C1 — Storage device: a byte-addressable object store.
//!
//! An object is identified by a name (never a path with slashes); operations
//! are read/write/truncate/size/has/remove/list. [`FileStorageDevice`] is the
//! only implementation in this crate: one object per regular file inside a
//! device-rooted directory.

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Capability trait every storage backend implements. Kept small and
/// dispatch-free on the hot path — no plugin needs more than this.
pub trait StorageDevice: Send + Sync {
    fn read(&self, id: &str, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn write(&self, id: &str, offset: u64, data: &[u8], sync: bool) -> Result<()>;
    fn truncate(&self, id: &str, len: u64) -> Result<()>;
    /// Size in bytes, or `0` if the object does not exist.
    fn size(&self, id: &str) -> Result<u64>;
    fn has(&self, id: &str) -> Result<bool>;
    fn remove(&self, id: &str) -> Result<()>;
    /// Every object name present, skipping hidden dot-entries.
    fn list(&self) -> Result<Vec<String>>;
    fn identifier(&self) -> &str;
}

/// A storage device backed by one regular file per object, all living under
/// a single root directory.
pub struct FileStorageDevice {
    identifier: String,
    root: PathBuf,
}

impl FileStorageDevice {
    pub fn new(identifier: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            identifier: identifier.into(),
            root,
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl StorageDevice for FileStorageDevice {
    fn read(&self, id: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        let file = File::open(&path)
            .map_err(|e| Error::with_source(
                crate::error::ErrorKind::NotFound,
                format!("read {id}: no such object"),
                e,
            ))?;
        let mut buf = vec![0u8; len];
        let n = file.read_at(&mut buf, offset)?;
        if n < len {
            buf.truncate(n);
        }
        Ok(buf)
    }

    fn write(&self, id: &str, offset: u64, data: &[u8], sync: bool) -> Result<()> {
        let path = self.path_for(id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&path)?;
        file.write_all_at(data, offset)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    fn truncate(&self, id: &str, len: u64) -> Result<()> {
        let path = self.path_for(id);
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(len)?;
        Ok(())
    }

    fn size(&self, id: &str) -> Result<u64> {
        match fs::metadata(self.path_for(id)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, id: &str) -> Result<bool> {
        Ok(self.path_for(id).exists())
    }

    fn remove(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Convenience used by a handful of callers (device list files) that still
/// want a whole-object read/write without specifying an offset.
pub fn read_whole(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn write_whole(path: &Path, data: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    f.seek(SeekFrom::Start(0))?;
    f.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_object_read_object_returns_exact_bytes_written() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileStorageDevice::new("dev0", dir.path()).unwrap();
        dev.write("foo", 0, b"hello world", true).unwrap();
        let back = dev.read("foo", 0, 11).unwrap();
        assert_eq!(back, b"hello world");
    }

    #[test]
    fn size_of_a_missing_object_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileStorageDevice::new("dev0", dir.path()).unwrap();
        assert_eq!(dev.size("nope").unwrap(), 0);
    }

    #[test]
    fn list_skips_dot_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileStorageDevice::new("dev0", dir.path()).unwrap();
        dev.write("a", 0, b"x", true).unwrap();
        write_whole(&dir.path().join(".hidden"), b"y").unwrap();
        let names = dev.list().unwrap();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn truncate_shrinks_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileStorageDevice::new("dev0", dir.path()).unwrap();
        dev.write("a", 0, b"0123456789", true).unwrap();
        dev.truncate("a", 4).unwrap();
        assert_eq!(dev.size("a").unwrap(), 4);
    }
}

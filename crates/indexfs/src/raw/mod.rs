//! Raw filesystem collaborator.
//!
//! Everything physical goes through [`RawFs`]: the local disk, or a remote
//! store behind the same contract. All calls report a missing path as
//! [`FsError::NotFound`](crate::FsError::NotFound), distinct from other
//! failures.

mod local;
mod memory;

use memmap2::Mmap;
use std::fmt;

use crate::error::{FsError, FsResult};
use crate::options::RaidConfig;
use crate::types::FileMeta;

pub use local::LocalFs;
pub use memory::MemoryFs;

/// Sequential writer for one new physical file.
pub trait RawWriter: Send {
    /// Append bytes.
    fn append(&mut self, data: &[u8]) -> FsResult<()>;

    /// Bytes appended so far.
    fn len(&self) -> u64;

    /// Returns true if nothing has been appended.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and close. The file is complete once this returns.
    fn close(self: Box<Self>) -> FsResult<()>;
}

/// Physical filesystem operations.
///
/// Paths are absolute physical paths.
pub trait RawFs: Send + Sync + fmt::Debug {
    /// Check whether a path exists.
    fn exists(&self, path: &str) -> FsResult<bool>;

    /// Check whether a path is a directory.
    fn is_dir(&self, path: &str) -> FsResult<bool>;

    /// Length and timestamps.
    fn file_meta(&self, path: &str) -> FsResult<FileMeta>;

    /// Entry names relative to `path`, sorted. Directories are included.
    fn list_dir(&self, path: &str, recursive: bool) -> FsResult<Vec<String>>;

    /// Positional read. Returns bytes read (short at end of file).
    fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> FsResult<usize>;

    /// Create (or truncate) a file for writing.
    fn open_write(&self, path: &str, raid: Option<&RaidConfig>) -> FsResult<Box<dyn RawWriter>>;

    /// Rename, replacing the destination.
    fn rename(&self, src: &str, dst: &str) -> FsResult<()>;

    /// Delete a file or a directory tree.
    fn delete(&self, path: &str, may_non_exist: bool) -> FsResult<()>;

    /// Create a symbolic link at `dst` pointing to `src`.
    fn symlink(&self, src: &str, dst: &str) -> FsResult<()>;

    /// Create a directory.
    fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()>;

    /// Memory-map a file, when the filesystem is local.
    fn mmap(&self, _path: &str) -> FsResult<Option<Mmap>> {
        Ok(None)
    }

    /// Read an entire file.
    fn read_all(&self, path: &str) -> FsResult<Vec<u8>> {
        let meta = self.file_meta(path)?;
        let mut buf = vec![0u8; meta.length as usize];
        let n = self.read(path, &mut buf, 0)?;
        if n as u64 != meta.length {
            return Err(FsError::out_of_range(path, 0, meta.length, n as u64));
        }
        Ok(buf)
    }

    /// Write an entire file in one call.
    fn write_all(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let mut writer = self.open_write(path, None)?;
        writer.append(data)?;
        writer.close()
    }
}

//! Storage family.
//!
//! Each storage persists through one substrate: memory with a dump
//! pipeline, disk (optionally dual-rooted), or a package build. The
//! multi storage composes in-memory and disk storage for paths that
//! straddle both.

mod disk;
mod hybrid;
mod in_mem;
mod multi;
mod package;

use std::fmt;

pub use disk::DiskStorage;
pub use hybrid::HybridStorage;
pub use in_mem::InMemStorage;
pub use multi::MultiStorage;
pub use package::PackageStorage;

use crate::error::{FsError, FsResult};
use crate::file::{FileReader, FileWriter, SliceFileNode};
use crate::flush::FlushHandle;
use crate::types::{FileMeta, FsOpenType, FsStorageType, WriterOption};

/// Uniform create/read/list/remove contract over one substrate.
///
/// Paths are normalized absolute logical paths.
pub trait Storage: Send + Sync + fmt::Debug {
    fn storage_type(&self) -> FsStorageType;

    fn create_file_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader>;

    fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>>;

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()>;

    fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()>;

    fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()>;

    fn is_exist(&self, path: &str) -> FsResult<bool>;

    fn is_dir(&self, path: &str) -> FsResult<bool>;

    /// Entries under `dir`, relative to it and sorted.
    fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>>;

    fn file_meta(&self, path: &str) -> FsResult<FileMeta>;

    fn file_length(&self, path: &str) -> FsResult<u64> {
        Ok(self.file_meta(path)?.length)
    }

    /// Commit pending mutations. With `wait_finish` the returned handle
    /// is already complete.
    fn sync(&self, wait_finish: bool) -> FsResult<FlushHandle>;

    /// Evict clean, unreferenced cached nodes.
    fn clean_cache(&self);

    /// Holders of the cached node at `path`, including the cache.
    fn use_count(&self, path: &str) -> usize;

    /// Create an append-growable slice file held only in memory.
    fn create_slice_file(
        &self,
        path: &str,
        _slice_len: usize,
        _slice_num: usize,
    ) -> FsResult<std::sync::Arc<SliceFileNode>> {
        Err(FsError::unsupported(format!(
            "slice file {path} on {} storage",
            self.storage_type()
        )))
    }

    fn mount_package_file(&self, path: &str) -> FsResult<bool> {
        Err(FsError::unsupported(format!(
            "mounting package {path} on {} storage",
            self.storage_type()
        )))
    }
}

/// Error for a missing path unless the caller tolerates absence.
pub(crate) fn absent(path: &str, may_non_exist: bool) -> FsResult<()> {
    if may_non_exist {
        Ok(())
    } else {
        Err(FsError::not_found(path))
    }
}

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{InMemStorage, Storage, absent};
use crate::error::{FsError, FsResult};
use crate::file::{FileReader, FileWriter};
use crate::flush::FlushHandle;
use crate::types::{FileMeta, FsOpenType, FsStorageType, WriterOption};

/// Paths that straddle in-memory roots and disk: the file-system root and
/// every ancestor of a mounted in-memory root.
///
/// In-memory entries take precedence; listings merge both sides.
#[derive(Debug, Clone)]
pub struct MultiStorage {
    in_mem: InMemStorage,
    disk: Arc<dyn Storage>,
}

impl MultiStorage {
    pub fn new(in_mem: InMemStorage, disk: Arc<dyn Storage>) -> Self {
        Self { in_mem, disk }
    }

    fn owner(&self, path: &str) -> FsResult<&dyn Storage> {
        if self.in_mem.is_exist(path)? {
            Ok(&self.in_mem)
        } else {
            Ok(self.disk.as_ref())
        }
    }
}

impl Storage for MultiStorage {
    fn storage_type(&self) -> FsStorageType {
        FsStorageType::Multi
    }

    fn create_file_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        self.owner(path)?.create_file_reader(path, open_type)
    }

    fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        if self.in_mem.is_exist(path)? {
            return Err(FsError::already_exists(path));
        }
        self.disk.create_file_writer(path, option)
    }

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        if self.in_mem.is_exist(path)? {
            return self.in_mem.make_directory(path, recursive);
        }
        self.disk.make_directory(path, recursive)
    }

    fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        self.owner(path)?.remove_file(path, may_non_exist)
    }

    fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let in_mem_removed = self.in_mem.remove_subtree(path)?;
        self.disk
            .remove_directory(path, may_non_exist || in_mem_removed)
    }

    fn is_exist(&self, path: &str) -> FsResult<bool> {
        Ok(self.in_mem.is_exist(path)? || self.disk.is_exist(path)?)
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        if self.in_mem.is_exist(path)? {
            return self.in_mem.is_dir(path);
        }
        self.disk.is_dir(path)
    }

    fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        let in_mem = self.in_mem.cache().list_file(dir, recursive, false);
        let mut names: BTreeSet<String> = in_mem.into_iter().collect();
        match self.disk.list_file(dir, recursive) {
            Ok(disk) => names.extend(disk),
            Err(e) if e.is_not_found() && (!names.is_empty() || self.in_mem.is_dir(dir)?) => {}
            Err(e) => return Err(e),
        }
        Ok(names.into_iter().collect())
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        self.owner(path)?.file_meta(path)
    }

    fn sync(&self, wait_finish: bool) -> FsResult<FlushHandle> {
        self.in_mem.sync(wait_finish)
    }

    fn clean_cache(&self) {
        self.in_mem.clean_cache();
        self.disk.clean_cache();
    }

    fn use_count(&self, path: &str) -> usize {
        match self.in_mem.use_count(path) {
            0 => self.disk.use_count(path),
            n => n,
        }
    }

    fn mount_package_file(&self, path: &str) -> FsResult<bool> {
        self.disk.mount_package_file(path)
    }
}

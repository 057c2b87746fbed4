use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Storage, absent};
use crate::context::FileSystemContext;
use crate::error::{FsError, FsResult};
use crate::file::{
    DiskFileWriter, FileNodeHandle, FileReader, FileWriter, PackageInnerFileNode, SliceFileNode,
    open_physical_node,
};
use crate::file_node_cache::FileNodeCache;
use crate::flush::FlushHandle;
use crate::package::{InnerFileMeta, PackageFileMountTable};
use crate::path;
use crate::raw::RawFs;
use crate::resolver::{IdentityResolver, PhysicalPathResolver};
use crate::types::{FileMeta, FsFileType, FsOpenType, FsStorageType, WriterOption};

#[derive(Debug)]
struct DiskShared {
    raw: Arc<dyn RawFs>,
    context: Arc<FileSystemContext>,
    cache: FileNodeCache,
    packages: PackageFileMountTable,
    resolver: Arc<dyn PhysicalPathResolver>,
    kind: FsStorageType,
}

impl DiskShared {
    /// Drop block-cache contents of a physical file that changed.
    fn forget_blocks(&self, physical: &str) {
        if let Some(blocks) = self.context.options().block_cache.as_ref() {
            blocks.invalidate_file(physical);
        }
    }

    fn on_written(&self, path: &str, len: u64) -> FsResult<()> {
        for candidate in self.resolver.candidates(path)? {
            self.forget_blocks(&candidate);
        }
        self.context.path_meta().add_file_info(path, FileMeta::file(len));
        if self.cache.is_exist(path) && !self.cache.remove_file(path) {
            tracing::warn!(path, "rewritten file is still held by a reader");
        }
        Ok(())
    }
}

/// Files on the raw filesystem, plus mounted package files.
///
/// Readers are published into the file node cache when `use_cache` is set,
/// so a second open of the same path shares the node.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    shared: Arc<DiskShared>,
}

impl DiskStorage {
    pub fn new(raw: Arc<dyn RawFs>, context: Arc<FileSystemContext>) -> Self {
        Self::with_resolver(raw, context, Arc::new(IdentityResolver), FsStorageType::Disk)
    }

    pub(crate) fn with_resolver(
        raw: Arc<dyn RawFs>,
        context: Arc<FileSystemContext>,
        resolver: Arc<dyn PhysicalPathResolver>,
        kind: FsStorageType,
    ) -> Self {
        let cache = FileNodeCache::new(Arc::clone(context.metrics()));
        let packages = PackageFileMountTable::new(Arc::clone(&raw), Arc::clone(&resolver));
        Self {
            shared: Arc::new(DiskShared {
                raw,
                context,
                cache,
                packages,
                resolver,
                kind,
            }),
        }
    }

    pub fn cache(&self) -> &FileNodeCache {
        &self.shared.cache
    }

    pub fn package_table(&self) -> &PackageFileMountTable {
        &self.shared.packages
    }

    pub fn resolver(&self) -> &Arc<dyn PhysicalPathResolver> {
        &self.shared.resolver
    }

    fn use_cache(&self) -> bool {
        self.shared.context.options().use_cache
    }

    fn resolve(&self, path: &str, for_dump: bool) -> FsResult<String> {
        self.shared
            .resolver
            .resolve(self.shared.raw.as_ref(), path, for_dump)
    }

    fn candidates(&self, path: &str) -> FsResult<Vec<String>> {
        self.shared.resolver.candidates(path)
    }

    fn open_physical(&self, path: &str, physical: &str, open_type: FsOpenType) -> FsResult<FileNodeHandle> {
        let meta = self.shared.raw.file_meta(physical)?;
        if meta.is_dir {
            return Err(FsError::invalid_path(format!("{path} is a directory")));
        }
        let node = open_physical_node(
            &self.shared.raw,
            path,
            physical,
            meta.length,
            open_type,
            self.shared.context.options().block_cache.as_ref(),
        )?;
        Ok(FileNodeHandle::new(node))
    }

    fn open_package_inner(
        &self,
        path: &str,
        meta: &InnerFileMeta,
        open_type: FsOpenType,
    ) -> FsResult<FileNodeHandle> {
        if meta.is_dir {
            return Err(FsError::invalid_path(format!("{path} is a directory")));
        }
        let physical = match self.shared.cache.find(&meta.physical_path) {
            Some(handle) => handle,
            None => {
                let handle = self.open_physical(&meta.physical_path, &meta.physical_path, open_type)?;
                if self.use_cache() {
                    self.shared.cache.insert(handle.clone());
                }
                handle
            }
        };
        let inner = PackageInnerFileNode::new(path, physical, meta.offset, meta.length)?;
        Ok(FileNodeHandle::from_node(inner))
    }

    /// Drop the cached data-file node once no mounted file refers to it.
    fn forget_unreferenced_data(&self, meta: &InnerFileMeta) {
        if self.shared.packages.physical_ref_count(&meta.physical_path) == 0 {
            self.shared.cache.clean_files(&[meta.physical_path.clone()]);
            self.shared.forget_blocks(&meta.physical_path);
        }
    }

    fn remove_physical(&self, path: &str, want_dir: bool) -> FsResult<bool> {
        let mut found = false;
        for candidate in self.candidates(path)? {
            if !self.shared.raw.exists(&candidate)? {
                continue;
            }
            if self.shared.raw.is_dir(&candidate)? != want_dir {
                return Err(FsError::invalid_path(if want_dir {
                    format!("{path} is not a directory")
                } else {
                    format!("{path} is a directory")
                }));
            }
            found = true;
            if self.shared.resolver.may_delete(&candidate, path) {
                if want_dir {
                    for rel in self.shared.raw.list_dir(&candidate, true)? {
                        self.shared.forget_blocks(&path::join(&candidate, &rel)?);
                    }
                }
                self.shared.raw.delete(&candidate, false)?;
                self.shared.forget_blocks(&candidate);
            } else {
                tracing::debug!(path, physical = %candidate, "keeping copy on read-only root");
            }
        }
        Ok(found)
    }
}

impl Storage for DiskStorage {
    fn storage_type(&self) -> FsStorageType {
        self.shared.kind
    }

    fn create_file_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        if let Some(handle) = self.shared.cache.find(path) {
            if handle.file_type() == FsFileType::Directory {
                return Err(FsError::invalid_path(format!("{path} is a directory")));
            }
            return Ok(FileReader::new(handle, open_type));
        }
        if open_type == FsOpenType::Slice {
            return Err(FsError::not_found(format!("slice file {path}")));
        }

        let handle = match self.shared.packages.get_mount_meta(path) {
            Some(meta) => self.open_package_inner(path, &meta, open_type)?,
            None => {
                let physical = self.resolve(path, false)?;
                self.open_physical(path, &physical, open_type)?
            }
        };
        if self.use_cache() {
            self.shared.cache.insert(handle.clone());
        }
        tracing::trace!(path, ?open_type, file_type = ?handle.file_type(), "opened reader");
        Ok(FileReader::new(handle, open_type))
    }

    fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        if !option.overwrite && self.is_exist(path)? {
            return Err(FsError::already_exists(path));
        }
        let parent = path::parent(path).ok_or_else(|| FsError::invalid_path(path))?;
        let physical_parent = self.resolve(parent, true)?;
        if !self.shared.raw.is_dir(&physical_parent)? {
            let create = option.create_parents
                || self.shared.context.options().prohibit_in_mem_dump
                || self.is_dir(parent)?;
            if !create {
                return Err(FsError::not_found(parent));
            }
            self.shared.raw.mkdir(&physical_parent, true)?;
        }

        let physical = self.resolve(path, true)?;
        let shared = Arc::clone(&self.shared);
        let writer = DiskFileWriter::create(
            Arc::clone(&self.shared.raw),
            path,
            physical,
            self.shared.context.options().raid_config.as_ref(),
            Box::new(move |path, len| shared.on_written(path, len)),
        )?;
        Ok(Box::new(writer))
    }

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        if self.is_exist(path)? {
            if recursive && self.is_dir(path)? {
                return Ok(());
            }
            return Err(FsError::already_exists(path));
        }
        if !recursive {
            let parent = path::parent(path).ok_or_else(|| FsError::invalid_path(path))?;
            if !self.is_dir(parent)? {
                return Err(FsError::not_found(parent));
            }
        }
        let physical = self.resolve(path, true)?;
        self.shared.raw.mkdir(&physical, true)
    }

    fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let cache = &self.shared.cache;
        if cache.get_use_count(path) > 1 {
            return Err(FsError::busy(path));
        }

        if let Some(meta) = self.shared.packages.get_mount_meta(path) {
            if meta.is_dir {
                return Err(FsError::invalid_path(format!("{path} is a directory")));
            }
            if cache.is_exist(path) && !cache.remove_file(path) {
                return Err(FsError::busy(path));
            }
            self.shared.packages.remove_file(path)?;
            self.forget_unreferenced_data(&meta);
            return Ok(());
        }

        let cached = cache.is_exist(path);
        if cached && !cache.remove_file(path) {
            return Err(FsError::busy(path));
        }
        self.shared.context.path_meta().remove_file(path);
        if !self.remove_physical(path, false)? && !cached {
            return absent(path, may_non_exist);
        }
        Ok(())
    }

    fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        if !self.shared.cache.remove_directory(path) {
            return Err(FsError::busy(path));
        }
        let mounted: Vec<InnerFileMeta> = self
            .shared
            .packages
            .list_file(path, true)
            .iter()
            .filter_map(|rel| path::join(path, rel).ok())
            .filter_map(|p| self.shared.packages.get_mount_meta(&p))
            .filter(|m| !m.is_dir)
            .collect();
        let removed_packages = self.shared.packages.remove_directory(path)?;
        for meta in &mounted {
            self.forget_unreferenced_data(meta);
        }

        self.shared.context.path_meta().remove_directory(path);
        let removed_physical = self.remove_physical(path, true)?;
        if !removed_packages && !removed_physical {
            return absent(path, may_non_exist);
        }
        Ok(())
    }

    fn is_exist(&self, path: &str) -> FsResult<bool> {
        if self.shared.cache.is_exist(path) || self.shared.packages.is_exist(path) {
            return Ok(true);
        }
        for candidate in self.candidates(path)? {
            if self.shared.raw.exists(&candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        if self.shared.packages.is_dir(path) {
            return Ok(true);
        }
        for candidate in self.candidates(path)? {
            if self.shared.raw.is_dir(&candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        let mut names = BTreeSet::new();
        let mut found = false;
        for candidate in self.candidates(dir)? {
            if self.shared.raw.is_dir(&candidate)? {
                found = true;
                names.extend(self.shared.raw.list_dir(&candidate, recursive)?);
            }
        }
        if self.shared.packages.is_dir(dir) {
            found = true;
            names.extend(self.shared.packages.list_file(dir, recursive));
        }
        if !found {
            return Err(FsError::not_found(dir));
        }
        names.extend(self.shared.cache.list_file(dir, recursive, true));
        Ok(names.into_iter().collect())
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        if let Some(meta) = self.shared.packages.get_mount_meta(path) {
            return Ok(if meta.is_dir {
                FileMeta::directory()
            } else {
                FileMeta::file(meta.length)
            });
        }
        if let Some(meta) = self.shared.context.path_meta().get(path) {
            return Ok(meta);
        }
        if let Some(len) = self.shared.cache.find(path).map(|h| h.len()) {
            return Ok(FileMeta::file(len));
        }
        for candidate in self.candidates(path)? {
            match self.shared.raw.file_meta(&candidate) {
                Ok(meta) => return Ok(meta),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(FsError::not_found(path))
    }

    fn sync(&self, _wait_finish: bool) -> FsResult<FlushHandle> {
        Ok(FlushHandle::ready(Ok(())))
    }

    fn clean_cache(&self) {
        self.shared.cache.clean();
    }

    fn use_count(&self, path: &str) -> usize {
        self.shared.cache.get_use_count(path)
    }

    fn mount_package_file(&self, path: &str) -> FsResult<bool> {
        self.shared.packages.mount_package_file(path)
    }

    /// Slice files on disk storage live only in the file node cache.
    fn create_slice_file(
        &self,
        path: &str,
        slice_len: usize,
        slice_num: usize,
    ) -> FsResult<Arc<SliceFileNode>> {
        let parent = path::parent(path).ok_or_else(|| FsError::invalid_path(path))?;
        if !self.is_dir(parent)? {
            return Err(FsError::not_found(parent));
        }
        if self.is_exist(path)? {
            return Err(FsError::already_exists(path));
        }
        let node = Arc::new(SliceFileNode::new(path, slice_len, slice_num)?);
        self.shared.cache.insert(FileNodeHandle::new(node.clone()));
        Ok(node)
    }
}

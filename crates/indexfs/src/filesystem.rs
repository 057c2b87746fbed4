//! The file-system façade: one logical root, routed to its storages.

use std::sync::Arc;

use crate::context::FileSystemContext;
use crate::directory::{Directory, DirectoryKind};
use crate::error::{FsError, FsResult};
use crate::file::{FileNodeHandle, FileReader, FileWriter, SliceFileNode, open_physical_node};
use crate::flush::FlushHandle;
use crate::metrics::StorageMetrics;
use crate::mount_table::MountTable;
use crate::options::FileSystemOptions;
use crate::path;
use crate::raw::RawFs;
use crate::storage::{DiskStorage, HybridStorage, Storage};
use crate::types::{FileMeta, FsOpenType, FsStorageType, WriterOption};

/// Suffix of the symlink created next to the root when `use_root_link` is
/// set.
pub const ROOT_LINK_SUFFIX: &str = "@link";

/// An index directory tree rooted at one logical path.
///
/// Every path argument is normalized and must lie under the root. Paths
/// are routed through the [`MountTable`]: mounted in-memory and package
/// roots own their subtrees, everything else is disk.
#[derive(Debug)]
pub struct IndexFileSystem {
    root: String,
    raw: Arc<dyn RawFs>,
    context: Arc<FileSystemContext>,
    mounts: MountTable,
    root_link: Option<String>,
}

impl IndexFileSystem {
    /// Open a file system whose root lives on `raw`, creating the root
    /// directory if needed.
    pub fn new(root: &str, raw: Arc<dyn RawFs>, options: FileSystemOptions) -> FsResult<Arc<Self>> {
        let context = Arc::new(FileSystemContext::new(options));
        let disk: Arc<dyn Storage> = Arc::new(DiskStorage::new(Arc::clone(&raw), Arc::clone(&context)));
        Self::open(root, raw, context, disk)
    }

    /// Open a file system whose missing files fall back to
    /// `secondary_root`.
    pub fn with_secondary_root(
        root: &str,
        secondary_root: &str,
        secondary_read_only: bool,
        raw: Arc<dyn RawFs>,
        options: FileSystemOptions,
    ) -> FsResult<Arc<Self>> {
        let root = path::normalize(root)?;
        let context = Arc::new(FileSystemContext::new(options));
        let disk: Arc<dyn Storage> = Arc::new(HybridStorage::new(
            Arc::clone(&raw),
            Arc::clone(&context),
            &root,
            secondary_root,
            secondary_read_only,
        )?);
        Self::open(&root, raw, context, disk)
    }

    fn open(
        root: &str,
        raw: Arc<dyn RawFs>,
        context: Arc<FileSystemContext>,
        disk: Arc<dyn Storage>,
    ) -> FsResult<Arc<Self>> {
        let root = path::normalize(root)?;
        if !raw.is_dir(&root)? {
            raw.mkdir(&root, true)?;
        }
        let root_link = if context.options().use_root_link {
            Some(Self::create_root_link(raw.as_ref(), &root)?)
        } else {
            None
        };
        let mounts = MountTable::new(&root, Arc::clone(&raw), Arc::clone(&context), Arc::clone(&disk))?;
        tracing::info!(
            root = %root,
            storage = %disk.storage_type(),
            root_link = root_link.is_some(),
            "opened index file system"
        );
        Ok(Arc::new(Self {
            root,
            raw,
            context,
            mounts,
            root_link,
        }))
    }

    fn create_root_link(raw: &dyn RawFs, root: &str) -> FsResult<String> {
        if root == "/" {
            return Err(FsError::invalid_argument("the root link needs a non-root directory"));
        }
        let link = format!("{root}{ROOT_LINK_SUFFIX}");
        raw.delete(&link, true)?;
        raw.symlink(root, &link)?;
        tracing::debug!(link = %link, "created root link");
        Ok(link)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn options(&self) -> &FileSystemOptions {
        self.context.options()
    }

    pub fn metrics(&self) -> &Arc<StorageMetrics> {
        self.context.metrics()
    }

    pub fn mount_table(&self) -> &MountTable {
        &self.mounts
    }

    /// Physical path of the root link, when enabled.
    pub fn root_link(&self) -> Option<&str> {
        self.root_link.as_deref()
    }

    fn logical(&self, path: &str) -> FsResult<String> {
        let path = path::normalize(path)?;
        if !path::is_under(&path, &self.root) {
            return Err(FsError::invalid_path(format!("{path} is outside {}", self.root)));
        }
        Ok(path)
    }

    fn route(&self, path: &str) -> FsResult<(String, Arc<dyn Storage>)> {
        let path = self.logical(path)?;
        let storage = self.mounts.get_storage(&path);
        Ok((path, storage))
    }

    /// Storage kind that owns `path`.
    pub fn storage_type(&self, path: &str) -> FsResult<FsStorageType> {
        Ok(self.route(path)?.1.storage_type())
    }

    pub fn create_file_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        let (path, storage) = self.route(path)?;
        storage.create_file_reader(&path, open_type)
    }

    /// Read through the root link, bypassing the file node cache.
    ///
    /// Package inner files have no linked physical copy and are served by
    /// the regular reader.
    pub fn create_link_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        let Some(link) = &self.root_link else {
            return Err(FsError::unsupported("root link is disabled"));
        };
        let (path, storage) = self.route(path)?;
        if storage.storage_type() != FsStorageType::Disk {
            return storage.create_file_reader(&path, open_type);
        }
        let rel = path::relative(&path, &self.root).unwrap_or_default();
        let linked = path::join(link, rel)?;
        let meta = match self.raw.file_meta(&linked) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return storage.create_file_reader(&path, open_type),
            Err(e) => return Err(e),
        };
        if meta.is_dir {
            return Err(FsError::invalid_path(format!("{path} is a directory")));
        }
        let node = open_physical_node(
            &self.raw,
            &path,
            &linked,
            meta.length,
            open_type,
            self.context.options().block_cache.as_ref(),
        )?;
        Ok(FileReader::new(FileNodeHandle::new(node), open_type))
    }

    pub fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        let (path, storage) = self.route(path)?;
        if path == self.root {
            return Err(FsError::invalid_path(path));
        }
        storage.create_file_writer(&path, option)
    }

    /// Write `data` to `path` in one call.
    pub fn write_file(&self, path: &str, data: &[u8], option: &WriterOption) -> FsResult<()> {
        let option = option.clone().with_expected_len(data.len() as u64);
        let mut writer = self.create_file_writer(path, &option)?;
        writer.write(data)?;
        writer.close()
    }

    pub fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        let (path, storage) = self.route(path)?;
        if path == self.root {
            return if recursive {
                Ok(())
            } else {
                Err(FsError::already_exists(path))
            };
        }
        storage.make_directory(&path, recursive)
    }

    /// Remove a file. A removal refused because the node is still held is
    /// retried once after a synchronous flush.
    pub fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let (path, storage) = self.route(path)?;
        self.retry_busy(|| storage.remove_file(&path, may_non_exist))
    }

    /// Remove a directory tree, forgetting any mounts inside it.
    pub fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let (path, storage) = self.route(path)?;
        if path == self.root {
            return Err(FsError::invalid_path("cannot remove the root"));
        }
        self.retry_busy(|| storage.remove_directory(&path, may_non_exist))?;
        self.mounts.unmount_under(&path);
        Ok(())
    }

    fn retry_busy(&self, op: impl Fn() -> FsResult<()>) -> FsResult<()> {
        match op() {
            Err(e) if e.is_busy() => {
                tracing::debug!(error = %e, "removal refused, syncing before retry");
                self.sync(true)?;
                op()
            }
            other => other,
        }
    }

    pub fn is_exist(&self, path: &str) -> FsResult<bool> {
        let (path, storage) = self.route(path)?;
        storage.is_exist(&path)
    }

    pub fn is_dir(&self, path: &str) -> FsResult<bool> {
        let (path, storage) = self.route(path)?;
        storage.is_dir(&path)
    }

    /// Entries under `dir`, relative to it and sorted.
    pub fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        let (dir, storage) = self.route(dir)?;
        storage.list_file(&dir, recursive)
    }

    pub fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        let (path, storage) = self.route(path)?;
        storage.file_meta(&path)
    }

    pub fn file_length(&self, path: &str) -> FsResult<u64> {
        let (path, storage) = self.route(path)?;
        storage.file_length(&path)
    }

    /// Mount an in-memory or package storage at `path`.
    pub fn mount(&self, path: &str, storage_type: FsStorageType) -> FsResult<()> {
        let path = self.logical(path)?;
        self.mounts.mount(&path, storage_type)
    }

    /// Mount the package whose primary path is `path`. Returns false when
    /// it has no meta file.
    pub fn mount_package_file(&self, path: &str) -> FsResult<bool> {
        let (path, storage) = self.route(path)?;
        storage.mount_package_file(&path)
    }

    /// Commit the package storage mounted at `path` and mount the result.
    pub fn commit_package(&self, path: &str) -> FsResult<()> {
        let path = self.logical(path)?;
        self.mounts.commit_package(&path)
    }

    pub fn create_slice_file(
        &self,
        path: &str,
        slice_len: usize,
        slice_num: usize,
    ) -> FsResult<Arc<SliceFileNode>> {
        let (path, storage) = self.route(path)?;
        storage.create_slice_file(&path, slice_len, slice_num)
    }

    /// Dump pending in-memory files.
    pub fn sync(&self, wait_finish: bool) -> FsResult<FlushHandle> {
        self.mounts.in_mem().sync(wait_finish)
    }

    pub fn clean_cache(&self) {
        self.mounts.in_mem().clean_cache();
        self.mounts.disk().clean_cache();
    }

    /// Holders of the cached node at `path`, including the cache; 0 when
    /// nothing is cached.
    pub fn use_count(&self, path: &str) -> FsResult<usize> {
        let (path, storage) = self.route(path)?;
        Ok(storage.use_count(&path))
    }

    /// Handle on the directory at `path`.
    pub fn directory(self: &Arc<Self>, path: &str) -> FsResult<Directory> {
        let path = self.logical(path)?;
        if !self.is_dir(&path)? {
            return Err(FsError::not_found(path));
        }
        Ok(Directory::new(Arc::clone(self), path, DirectoryKind::Normal))
    }

    /// Handle on the root directory.
    pub fn root_directory(self: &Arc<Self>) -> Directory {
        Directory::new(Arc::clone(self), self.root.clone(), DirectoryKind::Normal)
    }

    /// Mount a package storage at `path` and return its write-only
    /// directory. Closing the directory commits the package.
    pub fn pack_directory(self: &Arc<Self>, path: &str) -> FsResult<Directory> {
        let path = self.logical(path)?;
        self.mounts.mount(&path, FsStorageType::Package)?;
        Ok(Directory::new(Arc::clone(self), path, DirectoryKind::Pack))
    }

    /// Read-only directory whose files are read through the root link.
    pub fn link_directory(self: &Arc<Self>, path: &str) -> FsResult<Directory> {
        if self.root_link.is_none() {
            return Err(FsError::unsupported("root link is disabled"));
        }
        let path = self.logical(path)?;
        if !self.is_dir(&path)? {
            return Err(FsError::not_found(path));
        }
        Ok(Directory::new(Arc::clone(self), path, DirectoryKind::Link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::MemoryFs;

    fn fs(options: FileSystemOptions) -> (Arc<MemoryFs>, Arc<IndexFileSystem>) {
        let raw = Arc::new(MemoryFs::new());
        let fs = IndexFileSystem::new("/index", raw.clone(), options).unwrap();
        (raw, fs)
    }

    #[test]
    fn test_root_is_created() {
        let (raw, fs) = fs(FileSystemOptions::default());
        assert!(raw.is_dir("/index").unwrap());
        assert!(fs.is_dir("/index").unwrap());
        assert_eq!(fs.storage_type("/index").unwrap(), FsStorageType::Multi);
        assert_eq!(fs.storage_type("/index/a").unwrap(), FsStorageType::Disk);
    }

    #[test]
    fn test_paths_outside_root_are_rejected() {
        let (_raw, fs) = fs(FileSystemOptions::default());
        assert!(matches!(fs.is_exist("/other"), Err(FsError::InvalidPath(_))));
        assert!(matches!(fs.is_exist("/index/../other"), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn test_in_memory_segment_lifecycle() {
        let (raw, fs) = fs(FileSystemOptions::default());
        fs.mount("/index/seg", FsStorageType::InMem).unwrap();
        fs.write_file("/index/seg/data", b"abc", &WriterOption::default())
            .unwrap();
        assert!(!raw.exists("/index/seg/data").unwrap());
        assert_eq!(fs.list_file("/index", true).unwrap(), vec!["seg", "seg/data"]);

        fs.sync(true).unwrap();
        assert_eq!(raw.read_all("/index/seg/data").unwrap(), b"abc");
    }

    #[test]
    fn test_remove_retries_busy_after_sync() {
        let (_raw, fs) = fs(FileSystemOptions::default());
        fs.mount("/index/seg", FsStorageType::InMem).unwrap();
        fs.write_file("/index/seg/data", b"abc", &WriterOption::default())
            .unwrap();
        assert_eq!(fs.use_count("/index/seg/data").unwrap(), 2);
        fs.remove_file("/index/seg/data", false).unwrap();
        assert!(!fs.is_exist("/index/seg/data").unwrap());
    }

    #[test]
    fn test_remove_directory_unmounts() {
        let (_raw, fs) = fs(FileSystemOptions::default());
        fs.mount("/index/seg", FsStorageType::InMem).unwrap();
        fs.sync(true).unwrap();
        fs.remove_directory("/index/seg", false).unwrap();
        assert!(fs.mount_table().list_mounts().is_empty());
        assert!(!fs.is_exist("/index/seg").unwrap());
    }

    #[test]
    fn test_link_reader() {
        let (raw, fs) = fs(FileSystemOptions::default().use_root_link(true));
        assert_eq!(fs.root_link(), Some("/index@link"));
        raw.write_all("/index/f", b"linked").unwrap();
        let reader = fs.create_link_reader("/index/f", FsOpenType::InMem).unwrap();
        assert_eq!(reader.read_all().unwrap(), b"linked");
        assert_eq!(fs.use_count("/index/f").unwrap(), 0);
    }

    #[test]
    fn test_link_reader_disabled() {
        let (_raw, fs) = fs(FileSystemOptions::default());
        assert!(matches!(
            fs.create_link_reader("/index/f", FsOpenType::InMem),
            Err(FsError::Unsupported(_))
        ));
    }
}

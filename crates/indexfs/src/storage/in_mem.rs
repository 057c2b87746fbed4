use std::sync::Arc;

use super::{Storage, absent};
use crate::context::FileSystemContext;
use crate::error::{FsError, FsResult};
use crate::file::{
    DirectoryFileNode, FileNodeHandle, FileReader, FileWriter, InMemFileNode, InMemFileWriter,
    SliceFileNode,
};
use crate::file_node_cache::FileNodeCache;
use crate::flush::{
    DumpScheduler, FileFlushOperation, FlushHandle, FlushOperationQueue, MkdirFlushOperation,
};
use crate::path;
use crate::raw::RawFs;
use crate::types::{FileMeta, FsFileType, FsOpenType, FsStorageType, WriterOption, unix_now};

#[derive(Debug)]
struct InMemShared {
    raw: Arc<dyn RawFs>,
    context: Arc<FileSystemContext>,
    cache: FileNodeCache,
    pending: FlushOperationQueue,
    scheduler: DumpScheduler,
}

impl InMemShared {
    fn should_dump(&self) -> bool {
        self.context.options().should_dump()
    }

    fn publish(&self, path: String, data: Vec<u8>) -> FsResult<()> {
        let len = data.len() as u64;
        let replaced = self.cache.find(&path).map(|old| old.len());
        if let Some(quota) = &self.context.options().memory_quota_controller {
            if let Some(old_len) = replaced {
                quota.free(old_len);
            }
            quota.allocate(len);
        }

        let handle = FileNodeHandle::from_node(InMemFileNode::new(path.clone(), data, true));
        self.cache.insert(handle.clone());
        if self.should_dump() {
            self.pending.push_back(FileFlushOperation::new(
                Arc::clone(&self.raw),
                handle,
                path.clone(),
                Arc::clone(self.context.path_meta()),
                self.context.options().raid_config.clone(),
            ));
        }
        tracing::debug!(path = %path, len, "published in-memory file");
        Ok(())
    }

    fn require_parent(&self, path: &str, create: bool) -> FsResult<()> {
        let parent = path::parent(path).ok_or_else(|| FsError::invalid_path(path))?;
        if self.cache.is_directory(parent) {
            return Ok(());
        }
        if create {
            return self.make_directory(parent, true);
        }
        Err(FsError::not_found(parent))
    }

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        if self.cache.is_exist(path) {
            if recursive && self.cache.is_directory(path) {
                return Ok(());
            }
            return Err(FsError::already_exists(path));
        }
        self.require_parent(path, recursive)?;
        self.insert_directory(path);
        Ok(())
    }

    fn insert_directory(&self, path: &str) {
        self.cache
            .insert(FileNodeHandle::from_node(DirectoryFileNode::new(path)));
        if self.should_dump() {
            self.pending
                .push_back(MkdirFlushOperation::new(Arc::clone(&self.raw), path));
        }
    }

    fn free_quota(&self, bytes: u64) {
        if let Some(quota) = &self.context.options().memory_quota_controller {
            quota.free(bytes);
        }
    }
}

/// Files held in memory, dumped to the raw filesystem on sync.
///
/// One in-memory storage serves every in-memory root of a file system;
/// roots are added with [`add_root`](InMemStorage::add_root).
#[derive(Debug, Clone)]
pub struct InMemStorage {
    shared: Arc<InMemShared>,
}

impl InMemStorage {
    pub fn new(raw: Arc<dyn RawFs>, context: Arc<FileSystemContext>) -> FsResult<Self> {
        let scheduler = if context.options().enable_async_flush {
            DumpScheduler::background()?
        } else {
            DumpScheduler::inline()
        };
        let cache = FileNodeCache::new(Arc::clone(context.metrics()));
        Ok(Self {
            shared: Arc::new(InMemShared {
                raw,
                context,
                cache,
                pending: FlushOperationQueue::new(),
                scheduler,
            }),
        })
    }

    /// Register `path` as an in-memory root directory.
    pub fn add_root(&self, path: &str) -> FsResult<()> {
        if self.shared.cache.is_exist(path) {
            return Err(FsError::already_exists(path));
        }
        self.shared.insert_directory(path);
        tracing::info!(path, "added in-memory root");
        Ok(())
    }

    pub fn cache(&self) -> &FileNodeCache {
        &self.shared.cache
    }

    /// Operations waiting for the next sync.
    pub fn pending_flush_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Drop `dir` and every cached entry below it, whether or not `dir`
    /// itself is cached. Returns false when nothing was there.
    pub(crate) fn remove_subtree(&self, dir: &str) -> FsResult<bool> {
        let cache = &self.shared.cache;
        let mut paths: Vec<String> = cache
            .list_file(dir, true, false)
            .iter()
            .filter_map(|rel| path::join(dir, rel).ok())
            .collect();
        if cache.is_exist(dir) {
            paths.push(dir.to_string());
        }
        if paths.is_empty() {
            return Ok(false);
        }
        let bytes: u64 = paths
            .iter()
            .filter_map(|p| cache.find(p).map(|h| h.len()))
            .sum();
        if !cache.remove_directory(dir) {
            return Err(FsError::busy(dir));
        }
        self.shared.free_quota(bytes);
        self.shared.context.path_meta().remove_directory(dir);
        Ok(true)
    }
}

impl Storage for InMemStorage {
    fn storage_type(&self) -> FsStorageType {
        FsStorageType::InMem
    }

    fn create_file_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        let handle = self
            .shared
            .cache
            .find(path)
            .ok_or_else(|| FsError::not_found(path))?;
        match handle.file_type() {
            FsFileType::Directory => Err(FsError::invalid_path(format!("{path} is a directory"))),
            t if open_type == FsOpenType::Slice && t != FsFileType::Slice => {
                Err(FsError::not_found(format!("slice file {path}")))
            }
            _ => Ok(FileReader::new(handle, open_type)),
        }
    }

    fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        if self.shared.cache.is_exist(path) && !option.overwrite {
            return Err(FsError::already_exists(path));
        }
        self.shared.require_parent(path, option.create_parents)?;
        let shared = Arc::clone(&self.shared);
        Ok(Box::new(InMemFileWriter::new(
            path,
            option.expected_len.unwrap_or(0) as usize,
            Box::new(move |path, data| shared.publish(path, data)),
        )))
    }

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.shared.make_directory(path, recursive)
    }

    fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let cache = &self.shared.cache;
        let Some(len) = cache.find(path).map(|h| h.len()) else {
            return absent(path, may_non_exist);
        };
        if cache.is_directory(path) {
            return Err(FsError::invalid_path(format!("{path} is a directory")));
        }
        if !cache.remove_file(path) {
            return Err(FsError::busy(path));
        }
        self.shared.free_quota(len);
        self.shared.context.path_meta().remove_file(path);
        if self.shared.should_dump() {
            self.shared.raw.delete(path, true)?;
        }
        Ok(())
    }

    fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let cache = &self.shared.cache;
        if !cache.is_exist(path) {
            return absent(path, may_non_exist);
        }
        if !cache.is_directory(path) {
            return Err(FsError::invalid_path(format!("{path} is not a directory")));
        }
        self.remove_subtree(path)?;
        if self.shared.should_dump() {
            self.shared.raw.delete(path, true)?;
        }
        Ok(())
    }

    fn is_exist(&self, path: &str) -> FsResult<bool> {
        Ok(self.shared.cache.is_exist(path))
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        Ok(self.shared.cache.is_directory(path))
    }

    fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        if !self.shared.cache.is_directory(dir) {
            return Err(FsError::not_found(dir));
        }
        Ok(self.shared.cache.list_file(dir, recursive, false))
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        let handle = self
            .shared
            .cache
            .find(path)
            .ok_or_else(|| FsError::not_found(path))?;
        if let Some(meta) = self.shared.context.path_meta().get(path) {
            return Ok(meta);
        }
        let now = unix_now();
        Ok(FileMeta {
            length: handle.len(),
            create_time: now,
            modify_time: now,
            is_dir: handle.file_type() == FsFileType::Directory,
        })
    }

    fn sync(&self, wait_finish: bool) -> FsResult<FlushHandle> {
        let queue = self.shared.pending.take();
        let handle = if queue.is_empty() {
            FlushHandle::ready(Ok(()))
        } else {
            self.shared.scheduler.submit(queue)
        };
        if !wait_finish {
            return Ok(handle);
        }
        handle.wait()?;
        if self.shared.context.options().is_offline {
            self.clean_cache();
        }
        Ok(FlushHandle::ready(Ok(())))
    }

    fn clean_cache(&self) {
        self.shared.cache.clean();
    }

    fn use_count(&self, path: &str) -> usize {
        self.shared.cache.get_use_count(path)
    }

    fn create_slice_file(
        &self,
        path: &str,
        slice_len: usize,
        slice_num: usize,
    ) -> FsResult<Arc<SliceFileNode>> {
        self.shared.require_parent(path, false)?;
        let node = Arc::new(SliceFileNode::new(path, slice_len, slice_num)?);
        self.shared.cache.insert(FileNodeHandle::new(node.clone()));
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{FileSystemOptions, MemoryQuotaController};
    use crate::raw::MemoryFs;

    fn storage(options: FileSystemOptions) -> (Arc<MemoryFs>, InMemStorage) {
        let raw = Arc::new(MemoryFs::new());
        let storage = InMemStorage::new(raw.clone(), Arc::new(FileSystemContext::new(options))).unwrap();
        storage.add_root("/mem").unwrap();
        (raw, storage)
    }

    fn write(storage: &InMemStorage, path: &str, data: &[u8]) {
        let mut writer = storage.create_file_writer(path, &WriterOption::default()).unwrap();
        writer.write(data).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_write_is_visible_after_close() {
        let (_raw, storage) = storage(FileSystemOptions::default());
        let mut writer = storage
            .create_file_writer("/mem/f", &WriterOption::default())
            .unwrap();
        writer.write(b"hello").unwrap();
        assert!(!storage.is_exist("/mem/f").unwrap());
        writer.close().unwrap();

        let reader = storage.create_file_reader("/mem/f", FsOpenType::InMem).unwrap();
        assert_eq!(reader.as_slice().unwrap(), b"hello");
        assert_eq!(storage.use_count("/mem/f"), 3);
    }

    #[test]
    fn test_sync_dumps_directories_then_files() {
        let (raw, storage) = storage(FileSystemOptions::default());
        storage.make_directory("/mem/sub", false).unwrap();
        write(&storage, "/mem/sub/f", b"data");
        assert_eq!(storage.pending_flush_count(), 3);

        storage.sync(true).unwrap();
        assert_eq!(raw.read_all("/mem/sub/f").unwrap(), b"data");
        assert_eq!(storage.pending_flush_count(), 0);
        assert_eq!(storage.use_count("/mem/sub/f"), 1);
    }

    #[test]
    fn test_remove_busy_until_flushed() {
        let (_raw, storage) = storage(FileSystemOptions::default());
        write(&storage, "/mem/f", b"x");
        assert!(storage.remove_file("/mem/f", false).unwrap_err().is_busy());
        storage.sync(true).unwrap();
        storage.remove_file("/mem/f", false).unwrap();
        assert!(!storage.is_exist("/mem/f").unwrap());
        storage.remove_file("/mem/f", true).unwrap();
    }

    #[test]
    fn test_no_dump_when_prohibited() {
        let (raw, storage) = storage(FileSystemOptions::default().prohibit_in_mem_dump(true));
        write(&storage, "/mem/f", b"x");
        assert_eq!(storage.pending_flush_count(), 0);
        storage.sync(true).unwrap();
        assert!(!raw.exists("/mem/f").unwrap());
        storage.remove_file("/mem/f", false).unwrap();
    }

    #[test]
    fn test_writer_requires_parent() {
        let (_raw, storage) = storage(FileSystemOptions::default());
        let err = storage
            .create_file_writer("/mem/a/f", &WriterOption::default())
            .unwrap_err();
        assert!(err.is_not_found());
        storage
            .create_file_writer("/mem/a/f", &WriterOption::default().with_create_parents())
            .unwrap();
        assert!(storage.is_dir("/mem/a").unwrap());
    }

    #[test]
    fn test_existing_file_needs_overwrite() {
        let (_raw, storage) = storage(FileSystemOptions::default().need_flush(false));
        write(&storage, "/mem/f", b"1");
        assert!(storage
            .create_file_writer("/mem/f", &WriterOption::default())
            .is_err());
        let mut writer = storage
            .create_file_writer("/mem/f", &WriterOption::overwrite())
            .unwrap();
        writer.write(b"22").unwrap();
        writer.close().unwrap();
        assert_eq!(storage.file_length("/mem/f").unwrap(), 2);
    }

    #[test]
    fn test_memory_quota_tracks_files() {
        let quota = Arc::new(MemoryQuotaController::new(1024));
        let (_raw, storage) = storage(
            FileSystemOptions::default()
                .need_flush(false)
                .memory_quota_controller(quota.clone()),
        );
        write(&storage, "/mem/f", &[0u8; 100]);
        assert_eq!(quota.used(), 100);
        storage.remove_file("/mem/f", false).unwrap();
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn test_list_and_remove_directory() {
        let (_raw, storage) = storage(FileSystemOptions::default().need_flush(false));
        storage.make_directory("/mem/d/e", true).unwrap();
        write(&storage, "/mem/d/e/f", b"1");
        write(&storage, "/mem/dd", b"2");

        assert_eq!(storage.list_file("/mem", false).unwrap(), vec!["d", "dd"]);
        storage.remove_directory("/mem/d", false).unwrap();
        assert_eq!(storage.list_file("/mem", true).unwrap(), vec!["dd"]);
    }

    #[test]
    fn test_slice_file() {
        let (_raw, storage) = storage(FileSystemOptions::default());
        let slice = storage.create_slice_file("/mem/s", 8, 4).unwrap();
        slice.append(b"abc").unwrap();
        let reader = storage.create_file_reader("/mem/s", FsOpenType::Slice).unwrap();
        assert_eq!(reader.read_all().unwrap(), b"abc");
        assert!(storage
            .create_file_reader("/mem", FsOpenType::Slice)
            .is_err());
    }
}

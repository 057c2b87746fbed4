use std::sync::Arc;

use super::{DiskStorage, Storage};
use crate::context::FileSystemContext;
use crate::error::FsResult;
use crate::file::{FileReader, FileWriter};
use crate::flush::FlushHandle;
use crate::raw::RawFs;
use crate::resolver::DualRootResolver;
use crate::types::{FileMeta, FsOpenType, FsStorageType, WriterOption};

/// Disk storage over a writable primary root with a secondary fallback.
///
/// Reads, existence checks and listings consult the primary copy first and
/// then the secondary one. New files always land under the primary root.
/// A copy under a read-only secondary root survives removal unless it is
/// itself the primary copy.
#[derive(Debug, Clone)]
pub struct HybridStorage {
    disk: DiskStorage,
    resolver: Arc<DualRootResolver>,
}

impl HybridStorage {
    pub fn new(
        raw: Arc<dyn RawFs>,
        context: Arc<FileSystemContext>,
        primary_root: &str,
        secondary_root: &str,
        secondary_read_only: bool,
    ) -> FsResult<Self> {
        let resolver = Arc::new(DualRootResolver::new(
            primary_root,
            secondary_root,
            secondary_read_only,
        )?);
        let disk = DiskStorage::with_resolver(raw, context, resolver.clone(), FsStorageType::Hybrid);
        tracing::info!(
            primary = resolver.primary_root(),
            secondary = resolver.secondary_root(),
            secondary_read_only,
            "opened hybrid storage"
        );
        Ok(Self { disk, resolver })
    }

    pub fn resolver(&self) -> &DualRootResolver {
        &self.resolver
    }

    /// The disk storage doing the work.
    pub fn disk(&self) -> &DiskStorage {
        &self.disk
    }
}

impl Storage for HybridStorage {
    fn storage_type(&self) -> FsStorageType {
        FsStorageType::Hybrid
    }

    fn create_file_reader(&self, path: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        self.disk.create_file_reader(path, open_type)
    }

    fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        self.disk.create_file_writer(path, option)
    }

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.disk.make_directory(path, recursive)
    }

    fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        self.disk.remove_file(path, may_non_exist)
    }

    fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        self.disk.remove_directory(path, may_non_exist)
    }

    fn is_exist(&self, path: &str) -> FsResult<bool> {
        self.disk.is_exist(path)
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        self.disk.is_dir(path)
    }

    fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        self.disk.list_file(dir, recursive)
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        self.disk.file_meta(path)
    }

    fn sync(&self, wait_finish: bool) -> FsResult<FlushHandle> {
        self.disk.sync(wait_finish)
    }

    fn clean_cache(&self) {
        self.disk.clean_cache()
    }

    fn use_count(&self, path: &str) -> usize {
        self.disk.use_count(path)
    }

    fn mount_package_file(&self, path: &str) -> FsResult<bool> {
        self.disk.mount_package_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FileSystemOptions;
    use crate::package::{PAGE_SIZE, PackageFileWriter, data_path};
    use crate::raw::MemoryFs;

    fn hybrid(read_only: bool) -> (Arc<MemoryFs>, HybridStorage) {
        let raw = Arc::new(MemoryFs::new());
        raw.mkdir("/local/idx", true).unwrap();
        raw.mkdir("/remote/idx", true).unwrap();
        raw.write_all("/remote/idx/shared", b"remote").unwrap();
        let context = Arc::new(FileSystemContext::new(FileSystemOptions::default()));
        let storage = HybridStorage::new(raw.clone(), context, "/local", "/remote", read_only).unwrap();
        (raw, storage)
    }

    #[test]
    fn test_reads_fall_back_to_secondary() {
        let (_raw, storage) = hybrid(true);
        assert!(storage.is_exist("/local/idx/shared").unwrap());
        let reader = storage
            .create_file_reader("/local/idx/shared", FsOpenType::InMem)
            .unwrap();
        assert_eq!(reader.read_all().unwrap(), b"remote");
        assert_eq!(storage.list_file("/local/idx", false).unwrap(), vec!["shared"]);
    }

    #[test]
    fn test_primary_shadows_secondary() {
        let (raw, storage) = hybrid(true);
        raw.write_all("/local/idx/shared", b"local").unwrap();
        let reader = storage
            .create_file_reader("/local/idx/shared", FsOpenType::Buffered)
            .unwrap();
        assert_eq!(reader.read_all().unwrap(), b"local");
    }

    #[test]
    fn test_writes_land_on_primary() {
        let (raw, storage) = hybrid(true);
        let mut writer = storage
            .create_file_writer("/local/idx/new", &WriterOption::default())
            .unwrap();
        writer.write(b"n").unwrap();
        writer.close().unwrap();
        assert!(raw.exists("/local/idx/new").unwrap());
        assert!(!raw.exists("/remote/idx/new").unwrap());
    }

    #[test]
    fn test_read_only_secondary_copy_survives_removal() {
        let (raw, storage) = hybrid(true);
        raw.write_all("/local/idx/shared", b"local").unwrap();
        storage.remove_file("/local/idx/shared", false).unwrap();
        assert!(!raw.exists("/local/idx/shared").unwrap());
        assert!(raw.exists("/remote/idx/shared").unwrap());
    }

    #[test]
    fn test_writable_secondary_copy_is_removed() {
        let (raw, storage) = hybrid(false);
        storage.remove_file("/local/idx/shared", false).unwrap();
        assert!(!raw.exists("/remote/idx/shared").unwrap());
        assert!(!storage.is_exist("/local/idx/shared").unwrap());
    }

    #[test]
    fn test_package_on_read_only_secondary_is_kept() {
        let (raw, storage) = hybrid(true);
        let mut writer = PackageFileWriter::create(raw.clone(), "/remote/idx/pkg", PAGE_SIZE, None).unwrap();
        writer.add_file("f", b"abc").unwrap();
        writer.commit().unwrap();

        assert!(storage.mount_package_file("/local/idx/pkg").unwrap());
        let reader = storage.create_file_reader("/local/idx/pkg/f", FsOpenType::InMem).unwrap();
        assert_eq!(reader.read_all().unwrap(), b"abc");
        drop(reader);

        storage.remove_file("/local/idx/pkg/f", false).unwrap();
        assert!(raw.exists(&data_path("/remote/idx/pkg", 0)).unwrap());
        assert!(!storage.is_exist("/local/idx/pkg/f").unwrap());
    }
}

//! Package data files are deleted only when the last inner file goes.

use std::collections::HashMap;
use std::sync::Arc;

use indexfs::package::{PAGE_SIZE, data_path, meta_path};
use indexfs::{
    FileMeta, FileSystemOptions, FsOpenType, FsResult, IndexFileSystem, MemoryFs, PackageFileWriter,
    RaidConfig, RawFs, RawWriter, WriterOption,
};
use memmap2::Mmap;
use parking_lot::Mutex;

/// Counts physical deletes per path.
#[derive(Debug, Default)]
struct CountingFs {
    inner: MemoryFs,
    deletes: Mutex<HashMap<String, usize>>,
}

impl CountingFs {
    fn deletes_of(&self, path: &str) -> usize {
        self.deletes.lock().get(path).copied().unwrap_or(0)
    }
}

impl RawFs for CountingFs {
    fn exists(&self, path: &str) -> FsResult<bool> {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        self.inner.is_dir(path)
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        self.inner.file_meta(path)
    }

    fn list_dir(&self, path: &str, recursive: bool) -> FsResult<Vec<String>> {
        self.inner.list_dir(path, recursive)
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.inner.read(path, buf, offset)
    }

    fn open_write(&self, path: &str, raid: Option<&RaidConfig>) -> FsResult<Box<dyn RawWriter>> {
        self.inner.open_write(path, raid)
    }

    fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        self.inner.rename(src, dst)
    }

    fn delete(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        *self.deletes.lock().entry(path.to_string()).or_default() += 1;
        self.inner.delete(path, may_non_exist)
    }

    fn symlink(&self, src: &str, dst: &str) -> FsResult<()> {
        self.inner.symlink(src, dst)
    }

    fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.inner.mkdir(path, recursive)
    }

    fn mmap(&self, path: &str) -> FsResult<Option<Mmap>> {
        self.inner.mmap(path)
    }
}

fn setup() -> (Arc<CountingFs>, Arc<IndexFileSystem>) {
    let raw = Arc::new(CountingFs {
        inner: MemoryFs::new(),
        deletes: Mutex::default(),
    });
    let fs = IndexFileSystem::new("/index", raw.clone(), FileSystemOptions::default()).unwrap();
    raw.mkdir("/index/seg", false).unwrap();
    let mut writer = PackageFileWriter::create(raw.clone(), "/index/seg/pkg", PAGE_SIZE, None).unwrap();
    writer.add_file("f1", &[1u8; 10]).unwrap();
    writer.add_file("f2", &[2u8; 5]).unwrap();
    writer.commit().unwrap();
    assert!(fs.mount_package_file("/index/seg/pkg").unwrap());
    (raw, fs)
}

#[test]
fn shared_data_file_deleted_once_after_last_removal() {
    let (raw, fs) = setup();
    let data = data_path("/index/seg/pkg", 0);
    let meta = meta_path("/index/seg/pkg");

    let f1 = fs.create_file_reader("/index/seg/pkg/f1", FsOpenType::InMem).unwrap();
    let f2 = fs.create_file_reader("/index/seg/pkg/f2", FsOpenType::InMem).unwrap();
    assert_eq!(f1.read_all().unwrap(), vec![1u8; 10]);
    assert_eq!(f2.read_all().unwrap(), vec![2u8; 5]);
    drop((f1, f2));

    fs.remove_file("/index/seg/pkg/f1", false).unwrap();
    assert_eq!(raw.deletes_of(&data), 0);
    assert!(raw.exists(&data).unwrap());
    assert_eq!(
        fs.create_file_reader("/index/seg/pkg/f2", FsOpenType::InMem)
            .unwrap()
            .read_all()
            .unwrap(),
        vec![2u8; 5]
    );

    fs.remove_file("/index/seg/pkg/f2", false).unwrap();
    assert_eq!(raw.deletes_of(&data), 1);
    assert_eq!(raw.deletes_of(&meta), 1);
    assert!(!raw.exists(&data).unwrap());
    assert!(!fs.is_exist("/index/seg/pkg/f2").unwrap());
}

#[test]
fn held_inner_file_blocks_removal() {
    let (raw, fs) = setup();
    let reader = fs.create_file_reader("/index/seg/pkg/f1", FsOpenType::InMem).unwrap();
    assert!(fs.remove_file("/index/seg/pkg/f1", false).unwrap_err().is_busy());
    assert_eq!(reader.read_all().unwrap(), vec![1u8; 10]);
    drop(reader);
    fs.remove_file("/index/seg/pkg/f1", false).unwrap();
    fs.remove_file("/index/seg/pkg/f2", false).unwrap();
    assert_eq!(raw.deletes_of(&data_path("/index/seg/pkg", 0)), 1);
}

#[test]
fn removing_the_package_directory_deletes_its_files() {
    let (raw, fs) = setup();
    fs.write_file("/index/seg/plain", b"p", &WriterOption::default())
        .unwrap();
    fs.remove_directory("/index/seg", false).unwrap();
    assert!(!raw.exists("/index/seg").unwrap());
    assert!(!fs.is_exist("/index/seg/pkg/f1").unwrap());
}

//! End-to-end tests of the file-system façade over the local disk.

use std::fs;
use std::sync::Arc;

use indexfs::{
    BlockCache, BlockCacheOptions, FileSystemOptions, FsError, FsOpenType, FsStorageType, IndexFileSystem,
    LocalFs, WriterOption,
};
use tempfile::TempDir;

// ============================================================================
// Shared test setup
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open(options: FileSystemOptions) -> (TempDir, String, Arc<IndexFileSystem>) {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("index").to_string_lossy().into_owned();
    let fs = IndexFileSystem::new(&root, Arc::new(LocalFs::new()), options).unwrap();
    (tmp, root, fs)
}

// ============================================================================
// Disk
// ============================================================================

#[test]
fn disk_files_round_trip() {
    let (_tmp, root, fs) = open(FileSystemOptions::default());
    let file = format!("{root}/segment_0/data");
    fs.write_file(&file, b"posting lists", &WriterOption::default().with_create_parents())
        .unwrap();

    assert_eq!(fs::read(&file).unwrap(), b"posting lists");
    let reader = fs.create_file_reader(&file, FsOpenType::Mmap).unwrap();
    assert_eq!(reader.read_all().unwrap(), b"posting lists");
    assert_eq!(fs.file_length(&file).unwrap(), 13);
    assert_eq!(fs.list_file(&root, true).unwrap(), vec!["segment_0", "segment_0/data"]);
    assert!(matches!(
        fs.write_file(&file, b"again", &WriterOption::default()),
        Err(FsError::AlreadyExists(_))
    ));

    assert!(fs.remove_file(&file, false).unwrap_err().is_busy());
    drop(reader);
    fs.remove_file(&file, false).unwrap();
    assert!(!fs.is_exist(&file).unwrap());
    fs.remove_file(&file, true).unwrap();
    assert!(fs.remove_file(&file, false).unwrap_err().is_not_found());
}

#[test]
fn removing_a_directory_forgets_nested_mounts() {
    let (_tmp, root, fs) = open(FileSystemOptions::default());
    fs.make_directory(&format!("{root}/seg"), false).unwrap();
    fs.mount(&format!("{root}/seg/rt"), FsStorageType::InMem).unwrap();
    fs.write_file(&format!("{root}/seg/rt/f"), b"x", &WriterOption::default())
        .unwrap();

    fs.remove_directory(&format!("{root}/seg"), false).unwrap();
    assert!(fs.mount_table().list_mounts().is_empty());
    assert!(!fs.is_exist(&format!("{root}/seg")).unwrap());
    assert!(matches!(
        fs.remove_directory(&root, true),
        Err(FsError::InvalidPath(_))
    ));
}

// ============================================================================
// Block cache
// ============================================================================

fn block_cached() -> FileSystemOptions {
    let cache = BlockCache::new(BlockCacheOptions::default().block_size(16)).unwrap();
    FileSystemOptions::default().block_cache(Arc::new(cache))
}

fn read_cached(fs: &IndexFileSystem, file: &str) -> Vec<u8> {
    let reader = fs.create_file_reader(file, FsOpenType::Cache).unwrap();
    assert!(reader.block_accessor().is_some());
    reader.read_all().unwrap()
}

#[test]
fn cached_blocks_do_not_outlive_a_removed_file() {
    let (_tmp, root, fs) = open(block_cached());
    let file = format!("{root}/f");
    fs.write_file(&file, &[b'A'; 32], &WriterOption::default()).unwrap();
    assert_eq!(read_cached(&fs, &file), vec![b'A'; 32]);

    fs.remove_file(&file, false).unwrap();
    fs.write_file(&file, &[b'B'; 32], &WriterOption::default()).unwrap();
    assert_eq!(read_cached(&fs, &file), vec![b'B'; 32]);
}

#[test]
fn cached_blocks_do_not_outlive_an_overwrite() {
    let (_tmp, root, fs) = open(block_cached());
    let file = format!("{root}/seg/f");
    fs.write_file(&file, &[b'A'; 40], &WriterOption::default().with_create_parents())
        .unwrap();
    assert_eq!(read_cached(&fs, &file), vec![b'A'; 40]);

    fs.write_file(&file, &[b'C'; 40], &WriterOption::overwrite()).unwrap();
    assert_eq!(read_cached(&fs, &file), vec![b'C'; 40]);

    fs.remove_directory(&format!("{root}/seg"), false).unwrap();
    fs.write_file(&file, &[b'D'; 40], &WriterOption::default().with_create_parents())
        .unwrap();
    assert_eq!(read_cached(&fs, &file), vec![b'D'; 40]);
}

// ============================================================================
// In-memory mounts
// ============================================================================

#[test]
fn in_memory_mount_dumps_on_sync() {
    let (_tmp, root, fs) = open(FileSystemOptions::default());
    let rt = format!("{root}/rt");
    fs.mount(&rt, FsStorageType::InMem).unwrap();
    fs.write_file(&format!("{rt}/attr/values"), b"1234", &WriterOption::default().with_create_parents())
        .unwrap();

    assert_eq!(fs.storage_type(&format!("{rt}/attr/values")).unwrap(), FsStorageType::InMem);
    assert_eq!(fs.storage_type(&root).unwrap(), FsStorageType::Multi);
    assert!(!std::path::Path::new(&format!("{rt}/attr/values")).exists());

    fs.sync(true).unwrap().wait().unwrap();
    assert_eq!(fs::read(format!("{rt}/attr/values")).unwrap(), b"1234");
    assert_eq!(fs.list_file(&root, false).unwrap(), vec!["rt"]);
}

#[test]
fn removal_held_by_pending_flush_succeeds_after_sync() {
    let (_tmp, root, fs) = open(FileSystemOptions::default());
    let rt = format!("{root}/rt");
    fs.mount(&rt, FsStorageType::InMem).unwrap();
    let file = format!("{rt}/f");
    fs.write_file(&file, b"abc", &WriterOption::default()).unwrap();

    // The queued flush holds the node, so the first attempt is refused.
    fs.remove_file(&file, false).unwrap();
    assert!(!fs.is_exist(&file).unwrap());
    assert!(!std::path::Path::new(&file).exists());
}

#[test]
fn removal_with_live_reader_stays_busy() {
    let (_tmp, root, fs) = open(FileSystemOptions::default());
    let rt = format!("{root}/rt");
    fs.mount(&rt, FsStorageType::InMem).unwrap();
    let file = format!("{rt}/f");
    fs.write_file(&file, b"abc", &WriterOption::default()).unwrap();

    let reader = fs.create_file_reader(&file, FsOpenType::InMem).unwrap();
    assert!(fs.remove_file(&file, false).unwrap_err().is_busy());
    assert_eq!(reader.read_all().unwrap(), b"abc");
    drop(reader);
    fs.remove_file(&file, false).unwrap();
}

// ============================================================================
// Secondary root
// ============================================================================

#[test]
fn read_only_secondary_copy_survives_removal() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let primary = tmp.path().join("primary").to_string_lossy().into_owned();
    let secondary = tmp.path().join("secondary").to_string_lossy().into_owned();
    fs::create_dir_all(format!("{secondary}/seg")).unwrap();
    fs::write(format!("{secondary}/seg/old"), b"history").unwrap();

    let fs = IndexFileSystem::with_secondary_root(
        &primary,
        &secondary,
        true,
        Arc::new(LocalFs::new()),
        FileSystemOptions::default(),
    )
    .unwrap();
    let logical = format!("{primary}/seg/old");
    assert_eq!(
        fs.create_file_reader(&logical, FsOpenType::InMem).unwrap().read_all().unwrap(),
        b"history"
    );
    fs.clean_cache();

    fs.remove_file(&logical, false).unwrap();
    assert_eq!(fs::read(format!("{secondary}/seg/old")).unwrap(), b"history");
}

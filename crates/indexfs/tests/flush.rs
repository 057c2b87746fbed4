//! In-memory dumps, inline and on the background worker.

use std::sync::Arc;

use indexfs::{
    FileSystemOptions, FsStorageType, IndexFileSystem, MemoryFs, MemoryQuotaController, RawFs,
    WriterOption,
};

fn open(options: FileSystemOptions) -> (Arc<MemoryFs>, Arc<IndexFileSystem>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let raw = Arc::new(MemoryFs::new());
    let fs = IndexFileSystem::new("/index", raw.clone(), options).unwrap();
    fs.mount("/index/rt", FsStorageType::InMem).unwrap();
    (raw, fs)
}

#[tokio::test(flavor = "multi_thread")]
async fn background_flush_completes_when_awaited() {
    let (raw, fs) = open(FileSystemOptions::default().enable_async_flush(true));
    let option = WriterOption::default().with_create_parents();
    for i in 0..3 {
        fs.write_file(&format!("/index/rt/seg/f{i}"), format!("v{i}").as_bytes(), &option)
            .unwrap();
    }
    assert!(!raw.exists("/index/rt/seg/f0").unwrap());

    fs.sync(false).unwrap().await.unwrap();
    for i in 0..3 {
        assert_eq!(
            raw.read_all(&format!("/index/rt/seg/f{i}")).unwrap(),
            format!("v{i}").as_bytes()
        );
    }
    assert_eq!(fs.mount_table().in_mem().pending_flush_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn consecutive_passes_keep_submission_order() {
    let (raw, fs) = open(FileSystemOptions::default().enable_async_flush(true));
    fs.write_file("/index/rt/f", b"first", &WriterOption::default())
        .unwrap();
    let first = fs.sync(false).unwrap();
    fs.write_file("/index/rt/f", b"second", &WriterOption::overwrite())
        .unwrap();
    let second = fs.sync(false).unwrap();

    second.await.unwrap();
    first.await.unwrap();
    assert_eq!(raw.read_all("/index/rt/f").unwrap(), b"second");
}

#[test]
fn prohibited_dump_keeps_files_in_memory() {
    let quota = Arc::new(MemoryQuotaController::new(1024));
    let (raw, fs) = open(
        FileSystemOptions::default()
            .prohibit_in_mem_dump(true)
            .memory_quota_controller(Arc::clone(&quota)),
    );
    fs.write_file("/index/rt/f", &[0u8; 100], &WriterOption::default())
        .unwrap();
    fs.sync(true).unwrap().wait().unwrap();

    assert!(!raw.exists("/index/rt").unwrap());
    assert_eq!(quota.used(), 100);
    fs.remove_file("/index/rt/f", false).unwrap();
    assert_eq!(quota.used(), 0);
}

#[test]
fn offline_sync_cleans_dumped_nodes() {
    let (raw, fs) = open(FileSystemOptions::default().is_offline(true));
    fs.write_file("/index/rt/f", b"data", &WriterOption::default())
        .unwrap();
    assert_eq!(fs.use_count("/index/rt/f").unwrap(), 2);

    fs.sync(true).unwrap().wait().unwrap();
    assert_eq!(raw.read_all("/index/rt/f").unwrap(), b"data");
    assert_eq!(fs.use_count("/index/rt/f").unwrap(), 0);
}

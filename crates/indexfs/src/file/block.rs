use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::FileNode;
use crate::block::BlockFileAccessor;
use crate::error::FsResult;
use crate::raw::RawFs;
use crate::types::{FsFileType, FsOpenType, ReadOption};

/// File read block by block through the shared block cache.
#[derive(Debug)]
pub struct BlockFileNode {
    path: String,
    accessor: Arc<BlockFileAccessor>,
    dirty: AtomicBool,
}

impl BlockFileNode {
    pub fn new(path: impl Into<String>, accessor: BlockFileAccessor) -> Self {
        Self {
            path: path.into(),
            accessor: Arc::new(accessor),
            dirty: AtomicBool::new(false),
        }
    }
}

impl FileNode for BlockFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        FsFileType::Block
    }

    fn open_type(&self) -> FsOpenType {
        FsOpenType::Cache
    }

    fn len(&self) -> u64 {
        self.accessor.len()
    }

    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        self.accessor.read(buf, offset, option)
    }

    fn block_accessor(&self) -> Option<&Arc<BlockFileAccessor>> {
        Some(&self.accessor)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}

/// Uncached positional reads against the raw filesystem.
#[derive(Debug)]
pub struct BufferedFileNode {
    path: String,
    physical_path: String,
    len: u64,
    open_type: FsOpenType,
    raw: Arc<dyn RawFs>,
    dirty: AtomicBool,
}

impl BufferedFileNode {
    pub fn new(
        path: impl Into<String>,
        physical_path: impl Into<String>,
        len: u64,
        open_type: FsOpenType,
        raw: Arc<dyn RawFs>,
    ) -> Self {
        Self {
            path: path.into(),
            physical_path: physical_path.into(),
            len,
            open_type,
            raw,
            dirty: AtomicBool::new(false),
        }
    }
}

impl FileNode for BufferedFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        FsFileType::Buffered
    }

    fn open_type(&self) -> FsOpenType {
        self.open_type
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let n = buf.len().min((self.len - offset) as usize);
        option.count_blocks(1);
        self.raw.read(&self.physical_path, &mut buf[..n], offset)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}

use std::sync::Arc;

use super::FileNodeHandle;
use crate::block::BlockFileAccessor;
use crate::error::{FsError, FsResult};
use crate::types::{FsFileType, FsOpenType, ReadOption};

/// Read handle for one file.
///
/// Holds a checkout of the node, so the file stays busy in its storage's
/// cache until the reader is dropped.
#[derive(Debug, Clone)]
pub struct FileReader {
    node: FileNodeHandle,
    open_type: FsOpenType,
}

impl FileReader {
    pub fn new(node: FileNodeHandle, open_type: FsOpenType) -> Self {
        Self { node, open_type }
    }

    pub fn path(&self) -> &str {
        self.node.path()
    }

    pub fn len(&self) -> u64 {
        self.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.len() == 0
    }

    /// The open type the caller asked for.
    pub fn open_type(&self) -> FsOpenType {
        self.open_type
    }

    /// The representation actually backing the reader.
    pub fn file_type(&self) -> FsFileType {
        self.node.file_type()
    }

    pub fn node(&self) -> &FileNodeHandle {
        &self.node
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.node.read(buf, offset, &ReadOption::default())
    }

    pub fn read_with(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        self.node.read(buf, offset, option)
    }

    /// Fill `buf` completely or fail with `OutOfRange`.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<()> {
        let n = self.node.read(buf, offset, option)?;
        if n != buf.len() {
            return Err(FsError::out_of_range(
                self.path(),
                offset,
                buf.len() as u64,
                self.len(),
            ));
        }
        Ok(())
    }

    /// Whole file content.
    pub fn read_all(&self) -> FsResult<Vec<u8>> {
        if let Some(data) = self.node.as_slice() {
            return Ok(data.to_vec());
        }
        let mut buf = vec![0u8; self.len() as usize];
        self.read_exact_at(&mut buf, 0, &ReadOption::default())?;
        Ok(buf)
    }

    /// Whole content when the backing node is memory resident.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.node.as_slice()
    }

    pub fn block_accessor(&self) -> Option<&Arc<BlockFileAccessor>> {
        self.node.block_accessor()
    }

    /// Read `len` bytes at `offset` without blocking the runtime when the
    /// file is block-cache backed.
    pub async fn read_async(&self, offset: u64, len: usize, option: ReadOption) -> FsResult<Vec<u8>> {
        if let Some(accessor) = self.block_accessor() {
            return accessor.read_async(offset, len, option).await;
        }
        let mut buf = vec![0u8; len];
        let n = self.node.read(&mut buf, offset, &option)?;
        buf.truncate(n);
        Ok(buf)
    }
}

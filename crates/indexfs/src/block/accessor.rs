//! Block-granular access to one physical file.

use std::sync::Arc;

use super::cache::{Block, BlockCache, BlockKey};
use crate::error::{FsError, FsResult};
use crate::raw::RawFs;
use crate::types::ReadOption;

/// Reads a physical file through the shared [`BlockCache`].
///
/// Every miss reads one whole block from the raw filesystem and publishes
/// it, so concurrent readers of the same file share fetched blocks.
#[derive(Debug)]
pub struct BlockFileAccessor {
    physical_path: String,
    file_id: u64,
    file_len: u64,
    raw: Arc<dyn RawFs>,
    cache: Arc<BlockCache>,
}

impl BlockFileAccessor {
    pub fn new(
        physical_path: impl Into<String>,
        file_len: u64,
        raw: Arc<dyn RawFs>,
        cache: Arc<BlockCache>,
    ) -> Self {
        let physical_path = physical_path.into();
        Self {
            file_id: cache.file_id(&physical_path),
            physical_path,
            file_len,
            raw,
            cache,
        }
    }

    pub fn physical_path(&self) -> &str {
        &self.physical_path
    }

    pub fn len(&self) -> u64 {
        self.file_len
    }

    pub fn is_empty(&self) -> bool {
        self.file_len == 0
    }

    pub fn block_size(&self) -> usize {
        self.cache.block_size()
    }

    /// Number of cache blocks `[offset, offset + len)` spans.
    pub fn get_block_count(&self, offset: u64, len: u64) -> u64 {
        self.cache.block_count(offset, len)
    }

    pub fn get_in_block_offset(&self, offset: u64) -> usize {
        self.cache.in_block_offset(offset)
    }

    /// Block holding `offset`, fetched on a miss.
    pub fn get_block(&self, offset: u64, option: &ReadOption) -> FsResult<Block> {
        if offset >= self.file_len {
            return Err(FsError::out_of_range(
                &self.physical_path,
                offset,
                1,
                self.file_len,
            ));
        }
        let key = BlockKey {
            file_id: self.file_id,
            block_idx: self.cache.block_idx(offset),
        };
        option.count_blocks(1);
        if let Some(block) = self.cache.get(&key) {
            return Ok(block);
        }

        let block_offset = key.block_idx * self.block_size() as u64;
        let block_len = (self.file_len - block_offset).min(self.block_size() as u64) as usize;
        let mut data = vec![0u8; block_len];
        let n = self.raw.read(&self.physical_path, &mut data, block_offset)?;
        if n != block_len {
            return Err(FsError::out_of_range(
                &self.physical_path,
                block_offset,
                block_len as u64,
                block_offset + n as u64,
            ));
        }
        let block = Block::new(block_offset, data);
        self.cache.insert(key, block.clone());
        Ok(block)
    }

    /// Read through the cache. Short at end of file.
    pub fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        if offset >= self.file_len {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64).min(self.file_len);
        let mut cursor = offset;
        while cursor < end {
            let block = self.get_block(cursor, option)?;
            let in_block = (cursor - block.offset) as usize;
            let n = (block.len() - in_block).min((end - cursor) as usize);
            let dst = (cursor - offset) as usize;
            buf[dst..dst + n].copy_from_slice(&block.data()[in_block..in_block + n]);
            cursor += n as u64;
        }
        Ok((end - offset) as usize)
    }

    /// Read straight from the raw filesystem, bypassing the cache.
    pub fn read_direct(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.raw.read(&self.physical_path, buf, offset)
    }

    /// Fetch a block on the blocking pool.
    pub async fn get_block_async(self: &Arc<Self>, offset: u64, option: ReadOption) -> FsResult<Block> {
        let accessor = Arc::clone(self);
        tokio::task::spawn_blocking(move || accessor.get_block(offset, &option))
            .await
            .map_err(|e| FsError::other(format!("block read task failed: {e}")))?
    }

    /// Read `len` bytes at `offset` on the blocking pool.
    pub async fn read_async(
        self: &Arc<Self>,
        offset: u64,
        len: usize,
        option: ReadOption,
    ) -> FsResult<Vec<u8>> {
        let accessor = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let n = accessor.read(&mut buf, offset, &option)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(|e| FsError::other(format!("block read task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockCacheOptions;
    use crate::raw::MemoryFs;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn accessor(data: &[u8]) -> BlockFileAccessor {
        let raw = MemoryFs::new();
        raw.write_all("/f", data).unwrap();
        let cache = BlockCache::new(BlockCacheOptions::default().block_size(8)).unwrap();
        BlockFileAccessor::new("/f", data.len() as u64, Arc::new(raw), Arc::new(cache))
    }

    #[test]
    fn test_read_across_blocks() {
        let data: Vec<u8> = (0..30).collect();
        let accessor = accessor(&data);
        let mut buf = [0u8; 10];
        assert_eq!(accessor.read(&mut buf, 5, &ReadOption::default()).unwrap(), 10);
        assert_eq!(&buf, &data[5..15]);

        let mut tail = [0u8; 10];
        assert_eq!(accessor.read(&mut tail, 25, &ReadOption::default()).unwrap(), 5);
        assert_eq!(&tail[..5], &data[25..]);
    }

    #[test]
    fn test_block_count_and_counter() {
        let data = vec![7u8; 20];
        let accessor = accessor(&data);
        assert_eq!(accessor.get_block_count(0, 8), 1);
        assert_eq!(accessor.get_block_count(4, 8), 2);
        assert_eq!(accessor.get_in_block_offset(12), 4);

        let counter = Arc::new(AtomicU64::new(0));
        let mut buf = [0u8; 8];
        accessor
            .read(&mut buf, 4, &ReadOption::with_counter(counter.clone()))
            .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_last_block_is_short() {
        let data = vec![1u8; 20];
        let accessor = accessor(&data);
        let block = accessor.get_block(17, &ReadOption::default()).unwrap();
        assert_eq!(block.offset, 16);
        assert_eq!(block.len(), 4);
        assert!(accessor.get_block(20, &ReadOption::default()).is_err());
    }

    #[tokio::test]
    async fn test_read_async() {
        let data: Vec<u8> = (0..30).collect();
        let accessor = Arc::new(accessor(&data));
        let bytes = accessor
            .read_async(6, 4, ReadOption::default())
            .await
            .unwrap();
        assert_eq!(bytes, &data[6..10]);
    }
}

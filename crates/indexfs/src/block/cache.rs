//! Shared block cache.
//!
//! Blocks are keyed by `(file id, block index)`. The file id hashes the
//! physical path together with that path's generation, so every reader of
//! the same physical file shares its blocks, and a rewritten or deleted
//! file never serves blocks of its previous contents.

use moka::sync::Cache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

use crate::error::{FsError, FsResult};

/// Block cache sizing.
#[derive(Debug, Clone)]
pub struct BlockCacheOptions {
    /// Block size in bytes, a power of two (default: 4KiB).
    pub block_size: usize,
    /// Total cached bytes (default: 64MiB).
    pub capacity_bytes: u64,
}

impl Default for BlockCacheOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

impl BlockCacheOptions {
    /// Set the block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the capacity.
    pub fn capacity_bytes(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }
}

/// Cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub file_id: u64,
    pub block_idx: u64,
}

/// One cached block. Cheap to clone; the bytes are shared.
#[derive(Debug, Clone)]
pub struct Block {
    /// File offset of the first byte.
    pub offset: u64,
    data: Arc<[u8]>,
}

impl Block {
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    /// Block bytes (short for the last block of a file).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Process-wide block cache shared by `Cache` opens.
pub struct BlockCache {
    block_size: usize,
    block_bits: u32,
    blocks: Cache<BlockKey, Block>,
    /// Path hash -> generation, for paths invalidated at least once.
    generations: Mutex<HashMap<u64, u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("block_size", &self.block_size)
            .field("entries", &self.blocks.entry_count())
            .finish()
    }
}

impl BlockCache {
    /// Create a cache. The block size must be a power of two.
    pub fn new(options: BlockCacheOptions) -> FsResult<Self> {
        if options.block_size == 0 || !options.block_size.is_power_of_two() {
            return Err(FsError::invalid_argument(format!(
                "block size {} is not a power of two",
                options.block_size
            )));
        }
        let blocks = Cache::builder()
            .max_capacity(options.capacity_bytes)
            .weigher(|_k: &BlockKey, v: &Block| v.len().try_into().unwrap_or(u32::MAX))
            .build();
        Ok(Self {
            block_size: options.block_size,
            block_bits: options.block_size.trailing_zeros(),
            blocks,
            generations: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Index of the block holding `offset`.
    pub fn block_idx(&self, offset: u64) -> u64 {
        offset >> self.block_bits
    }

    /// Offset of `offset` inside its block.
    pub fn in_block_offset(&self, offset: u64) -> usize {
        (offset & (self.block_size as u64 - 1)) as usize
    }

    /// Number of blocks the range `[offset, offset + len)` touches.
    pub fn block_count(&self, offset: u64, len: u64) -> u64 {
        if len == 0 {
            return 0;
        }
        self.block_idx(offset + len - 1) - self.block_idx(offset) + 1
    }

    pub fn get(&self, key: &BlockKey) -> Option<Block> {
        let found = self.blocks.get(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn insert(&self, key: BlockKey, block: Block) {
        self.blocks.insert(key, block);
    }

    /// Cache id of the current contents of `physical_path`.
    pub fn file_id(&self, physical_path: &str) -> u64 {
        let path_hash = xxh3_64(physical_path.as_bytes());
        match self.generations.lock().get(&path_hash) {
            Some(&generation) => xxh3_64_with_seed(physical_path.as_bytes(), generation),
            None => path_hash,
        }
    }

    /// Forget the blocks of `physical_path` after it was rewritten or
    /// deleted. Stale blocks become unreachable and age out.
    pub fn invalidate_file(&self, physical_path: &str) {
        let path_hash = xxh3_64(physical_path.as_bytes());
        *self.generations.lock().entry(path_hash).or_insert(0) += 1;
        tracing::trace!(physical = physical_path, "invalidated cached blocks");
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Drop every cached block.
    pub fn clear(&self) {
        self.blocks.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(BlockCache::new(BlockCacheOptions::default().block_size(3000)).is_err());
        assert!(BlockCache::new(BlockCacheOptions::default().block_size(0)).is_err());
    }

    #[test]
    fn test_block_math() {
        let cache = BlockCache::new(BlockCacheOptions::default().block_size(16)).unwrap();
        assert_eq!(cache.block_idx(15), 0);
        assert_eq!(cache.block_idx(16), 1);
        assert_eq!(cache.in_block_offset(19), 3);
        assert_eq!(cache.block_count(10, 6), 1);
        assert_eq!(cache.block_count(10, 7), 2);
        assert_eq!(cache.block_count(0, 0), 0);
    }

    #[test]
    fn test_hit_miss_stats() {
        let cache = BlockCache::new(BlockCacheOptions::default()).unwrap();
        let key = BlockKey {
            file_id: 1,
            block_idx: 0,
        };
        assert!(cache.get(&key).is_none());
        cache.insert(key, Block::new(0, vec![1, 2, 3]));
        assert_eq!(cache.get(&key).unwrap().data(), &[1, 2, 3]);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_invalidated_file_gets_fresh_id() {
        let cache = BlockCache::new(BlockCacheOptions::default()).unwrap();
        let before = cache.file_id("/idx/f");
        assert_eq!(cache.file_id("/idx/f"), before);
        cache.invalidate_file("/idx/f");
        let after = cache.file_id("/idx/f");
        assert_ne!(after, before);
        cache.invalidate_file("/idx/f");
        assert_ne!(cache.file_id("/idx/f"), after);
        assert_eq!(cache.file_id("/idx/g"), xxh3_64(b"/idx/g"));
    }
}

//! Core file-system types.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use strum::{Display, EnumCount, EnumIter};

/// Concrete physical representation backing a [`FileNode`](crate::FileNode).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum FsFileType {
    /// Heap buffer owned by the node.
    InMem,
    /// Read-only memory map of a physical file.
    Mmap,
    /// Physical file loaded fully into memory.
    MmapLocked,
    /// Block-granular reads through the shared block cache.
    Block,
    /// Direct positional reads, no caching.
    Buffered,
    /// Block-preallocated, append-growable auxiliary file.
    Slice,
    /// Structural directory entry.
    Directory,
}

impl FsFileType {
    /// Dense index for per-type metric arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// How a reader asked for a file to be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum FsOpenType {
    /// Load the whole file into memory.
    InMem,
    /// Memory-map the file (falls back to a full load on non-local roots).
    Mmap,
    /// Block-cache backed reads.
    Cache,
    /// Uncached positional reads.
    Buffered,
    /// Open an existing slice file.
    Slice,
}

/// Storage substrate tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FsStorageType {
    InMem,
    Disk,
    Hybrid,
    Package,
    Multi,
}

impl FsStorageType {
    /// Only in-memory and package storages can be mounted as sub-roots.
    pub fn is_mountable(self) -> bool {
        matches!(self, FsStorageType::InMem | FsStorageType::Package)
    }
}

/// Physical file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Length in bytes.
    pub length: u64,
    /// Creation time, seconds since the Unix epoch.
    pub create_time: u64,
    /// Last modification time, seconds since the Unix epoch.
    pub modify_time: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

impl FileMeta {
    /// Metadata for a file written just now.
    pub fn file(length: u64) -> Self {
        let now = unix_now();
        Self {
            length,
            create_time: now,
            modify_time: now,
            is_dir: false,
        }
    }

    /// Metadata for a directory created just now.
    pub fn directory() -> Self {
        let now = unix_now();
        Self {
            length: 0,
            create_time: now,
            modify_time: now,
            is_dir: true,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    system_time_secs(SystemTime::now())
}

pub(crate) fn system_time_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Per-read advisory options.
///
/// There is no deadline or cancellation; timeouts belong to the raw
/// filesystem.
#[derive(Debug, Clone, Default)]
pub struct ReadOption {
    /// Hint that the caller prefers latency over throughput.
    pub low_latency: bool,
    /// Incremented once per block touched, when present.
    pub block_counter: Option<Arc<AtomicU64>>,
}

impl ReadOption {
    /// Read option that counts touched blocks into `counter`.
    pub fn with_counter(counter: Arc<AtomicU64>) -> Self {
        Self {
            low_latency: false,
            block_counter: Some(counter),
        }
    }

    pub(crate) fn count_blocks(&self, n: u64) {
        if let Some(counter) = &self.block_counter {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// Options for creating a file writer.
#[derive(Debug, Clone, Default)]
pub struct WriterOption {
    /// Overwrite an existing file instead of failing with `AlreadyExists`.
    pub overwrite: bool,
    /// Create missing parent directories instead of requiring them to exist.
    pub create_parents: bool,
    /// Expected final length, used to preallocate buffers.
    pub expected_len: Option<u64>,
}

impl WriterOption {
    /// Writer that replaces an existing file.
    pub fn overwrite() -> Self {
        Self {
            overwrite: true,
            ..Default::default()
        }
    }

    /// Allow missing parent directories.
    pub fn with_create_parents(mut self) -> Self {
        self.create_parents = true;
        self
    }

    /// Preallocate for `len` bytes.
    pub fn with_expected_len(mut self, len: u64) -> Self {
        self.expected_len = Some(len);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_file_type_index_is_dense() {
        let indices: Vec<_> = FsFileType::iter().map(|t| t.index()).collect();
        assert_eq!(indices, (0..FsFileType::COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(FsFileType::MmapLocked.to_string(), "mmap_locked");
        assert_eq!(FsOpenType::Cache.to_string(), "cache");
        assert_eq!(FsStorageType::InMem.to_string(), "in_mem");
    }

    #[test]
    fn test_mountable() {
        assert!(FsStorageType::InMem.is_mountable());
        assert!(FsStorageType::Package.is_mountable());
        assert!(!FsStorageType::Disk.is_mountable());
        assert!(!FsStorageType::Multi.is_mountable());
    }

    #[test]
    fn test_read_option_counter() {
        let counter = Arc::new(AtomicU64::new(0));
        let opt = ReadOption::with_counter(counter.clone());
        opt.count_blocks(2);
        opt.count_blocks(1);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }
}

//! # indexfs
//!
//! Virtual file system for search-index segments.
//!
//! An [`IndexFileSystem`] owns one logical root and routes every path to a
//! storage:
//! - in-memory mounts hold real-time segments, dumped to disk on
//!   [`sync`](IndexFileSystem::sync)
//! - package mounts collect many small files into one data file plus a
//!   JSON meta
//! - everything else lives on disk, optionally behind a second read-only
//!   root
//!
//! File contents are served by [`FileNode`]s checked out of a per-storage
//! cache, so a file with live readers cannot be removed underneath them.

pub mod block;
pub mod compress;
pub mod context;
pub mod deploy;
pub mod directory;
pub mod error;
pub mod file;
pub mod file_node_cache;
pub mod filesystem;
pub mod flush;
pub mod metrics;
pub mod mount_table;
pub mod options;
pub mod package;
pub mod path;
pub mod raw;
pub mod resolver;
pub mod storage;
pub mod types;

pub use block::{BlockCache, BlockCacheOptions, BlockFileAccessor};
pub use compress::{
    ChunkFileDecoder, ChunkFileEncoder, CompressFileAddressMapper, CompressFileReader,
    CompressFileWriter, CompressInfo,
};
pub use context::FileSystemContext;
pub use deploy::{DeployFileList, DeployFileMeta};
pub use directory::{Directory, DirectoryKind};
pub use error::{FsError, FsResult};
pub use file::{FileNode, FileNodeHandle, FileReader, FileWriter, SliceFileNode};
pub use file_node_cache::FileNodeCache;
pub use filesystem::IndexFileSystem;
pub use flush::{FlushHandle, PathMetaContainer};
pub use metrics::StorageMetrics;
pub use mount_table::{MountInfo, MountTable};
pub use options::{FileSystemOptions, MemoryQuotaController, MetricPreference, RaidConfig};
pub use package::{PackageFileMeta, PackageFileMountTable, PackageFileWriter};
pub use raw::{LocalFs, MemoryFs, RawFs, RawWriter};
pub use resolver::{DualRootResolver, IdentityResolver, PhysicalPathResolver};
pub use storage::{DiskStorage, HybridStorage, InMemStorage, MultiStorage, PackageStorage, Storage};
pub use types::{FileMeta, FsFileType, FsOpenType, FsStorageType, ReadOption, WriterOption};

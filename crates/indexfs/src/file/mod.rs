//! File nodes, readers and writers.

mod block;
mod directory;
mod in_mem;
mod mmap;
mod node;
mod package_inner;
mod reader;
mod writer;

use std::sync::Arc;

pub use block::{BlockFileNode, BufferedFileNode};
pub use directory::DirectoryFileNode;
pub use in_mem::{InMemFileNode, SliceFileNode};
pub use mmap::MmapFileNode;
pub use node::{FileNode, FileNodeHandle};
pub use package_inner::PackageInnerFileNode;
pub use reader::FileReader;
pub use writer::{DiskFileWriter, FileWriter, InMemFileWriter};

pub(crate) use writer::{PublishBuffer, PublishLength, temp_path_for};

use crate::block::{BlockCache, BlockFileAccessor};
use crate::error::{FsError, FsResult};
use crate::raw::RawFs;
use crate::types::FsOpenType;

/// Open a physical file as the node kind `open_type` asks for.
///
/// `Cache` degrades to buffered reads when no block cache is configured.
pub(crate) fn open_physical_node(
    raw: &Arc<dyn RawFs>,
    path: &str,
    physical_path: &str,
    len: u64,
    open_type: FsOpenType,
    block_cache: Option<&Arc<BlockCache>>,
) -> FsResult<Arc<dyn FileNode>> {
    let node: Arc<dyn FileNode> = match open_type {
        FsOpenType::InMem => Arc::new(InMemFileNode::load(raw.as_ref(), path, physical_path)?),
        FsOpenType::Mmap => Arc::new(MmapFileNode::open(raw.as_ref(), path, physical_path, false)?),
        FsOpenType::Cache => match block_cache {
            Some(cache) => Arc::new(BlockFileNode::new(
                path,
                BlockFileAccessor::new(physical_path, len, Arc::clone(raw), Arc::clone(cache)),
            )),
            None => Arc::new(BufferedFileNode::new(
                path,
                physical_path,
                len,
                FsOpenType::Cache,
                Arc::clone(raw),
            )),
        },
        FsOpenType::Buffered => Arc::new(BufferedFileNode::new(
            path,
            physical_path,
            len,
            FsOpenType::Buffered,
            Arc::clone(raw),
        )),
        FsOpenType::Slice => {
            return Err(FsError::not_found(format!("slice file {path}")));
        }
    };
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockCacheOptions;
    use crate::raw::MemoryFs;
    use crate::types::FsFileType;

    #[test]
    fn test_cache_open_degrades_without_block_cache() {
        let raw: Arc<dyn RawFs> = Arc::new(MemoryFs::new());
        raw.write_all("/f", b"data").unwrap();

        let node = open_physical_node(&raw, "/f", "/f", 4, FsOpenType::Cache, None).unwrap();
        assert_eq!(node.file_type(), FsFileType::Buffered);
        assert_eq!(node.open_type(), FsOpenType::Cache);

        let cache = Arc::new(BlockCache::new(BlockCacheOptions::default()).unwrap());
        let node =
            open_physical_node(&raw, "/f", "/f", 4, FsOpenType::Cache, Some(&cache)).unwrap();
        assert_eq!(node.file_type(), FsFileType::Block);
        assert!(node.block_accessor().is_some());
    }

    #[test]
    fn test_slice_open_requires_existing_slice() {
        let raw: Arc<dyn RawFs> = Arc::new(MemoryFs::new());
        let err = open_physical_node(&raw, "/s", "/s", 0, FsOpenType::Slice, None).unwrap_err();
        assert!(err.is_not_found());
    }
}

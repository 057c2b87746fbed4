//! The `FileNode` capability and its counted handle.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::block::BlockFileAccessor;
use crate::error::FsResult;
use crate::types::{FsFileType, FsOpenType, ReadOption};

/// One opened physical resource.
///
/// Content is immutable once a node is published; only the dirty flag
/// changes afterwards.
pub trait FileNode: Send + Sync + fmt::Debug {
    /// Logical path.
    fn path(&self) -> &str;

    /// Concrete representation.
    fn file_type(&self) -> FsFileType;

    /// How the node was requested.
    fn open_type(&self) -> FsOpenType;

    /// Length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional read; short at end of file.
    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize>;

    /// Whole content when resident in memory.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }

    /// Block accessor for cache-backed nodes.
    fn block_accessor(&self) -> Option<&Arc<BlockFileAccessor>> {
        None
    }

    /// Whether the node holds data not yet on durable storage.
    fn is_dirty(&self) -> bool;

    fn set_dirty(&self, dirty: bool);

    /// Whether the node is a window into a package data file.
    fn in_package(&self) -> bool {
        false
    }
}

/// Shared handle to a [`FileNode`] with an exact holder count.
///
/// Every clone counts as one holder and every drop releases one. The
/// file node cache keeps one handle itself, so a cached node nobody else
/// holds reports a use count of exactly 1.
pub struct FileNodeHandle {
    node: Arc<dyn FileNode>,
    holders: Arc<AtomicUsize>,
}

impl FileNodeHandle {
    pub fn new(node: Arc<dyn FileNode>) -> Self {
        Self {
            node,
            holders: Arc::new(AtomicUsize::new(1)),
        }
    }

    pub fn from_node(node: impl FileNode + 'static) -> Self {
        Self::new(Arc::new(node))
    }

    /// Number of live handles for this node.
    pub fn use_count(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    pub fn node(&self) -> &Arc<dyn FileNode> {
        &self.node
    }

    pub(crate) fn holders(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.holders)
    }
}

impl Clone for FileNodeHandle {
    fn clone(&self) -> Self {
        self.holders.fetch_add(1, Ordering::AcqRel);
        Self {
            node: Arc::clone(&self.node),
            holders: Arc::clone(&self.holders),
        }
    }
}

impl Drop for FileNodeHandle {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for FileNodeHandle {
    type Target = dyn FileNode;

    fn deref(&self) -> &Self::Target {
        self.node.as_ref()
    }
}

impl fmt::Debug for FileNodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileNodeHandle")
            .field("path", &self.node.path())
            .field("file_type", &self.node.file_type())
            .field("use_count", &self.use_count())
            .finish()
    }
}

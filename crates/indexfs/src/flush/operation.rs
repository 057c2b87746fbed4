use std::fmt;
use std::sync::Arc;

use super::PathMetaContainer;
use crate::error::FsResult;
use crate::file::{FileNodeHandle, temp_path_for};
use crate::options::RaidConfig;
use crate::raw::RawFs;
use crate::types::{FileMeta, ReadOption};

/// Upper bound for one append to the raw filesystem.
pub const FLUSH_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Something the dump pipeline can write out.
pub trait Dumpable: Send + fmt::Debug {
    fn dump(&self) -> FsResult<()>;

    /// Bytes the operation keeps alive until it runs.
    fn flush_memory_use(&self) -> u64 {
        0
    }
}

/// Create a physical directory (and its missing parents).
#[derive(Debug)]
pub struct MkdirFlushOperation {
    raw: Arc<dyn RawFs>,
    physical_path: String,
}

impl MkdirFlushOperation {
    pub fn new(raw: Arc<dyn RawFs>, physical_path: impl Into<String>) -> Self {
        Self {
            raw,
            physical_path: physical_path.into(),
        }
    }

    pub fn physical_path(&self) -> &str {
        &self.physical_path
    }
}

impl Dumpable for MkdirFlushOperation {
    fn dump(&self) -> FsResult<()> {
        if self.raw.is_dir(&self.physical_path)? {
            return Ok(());
        }
        self.raw.mkdir(&self.physical_path, true)
    }
}

/// Write one in-memory node to its physical path.
///
/// The operation holds a handle on the node, so the node cannot be
/// removed from its cache until the dump has run.
pub struct FileFlushOperation {
    raw: Arc<dyn RawFs>,
    node: FileNodeHandle,
    physical_path: String,
    path_meta: Arc<PathMetaContainer>,
    raid: Option<RaidConfig>,
}

impl FileFlushOperation {
    pub fn new(
        raw: Arc<dyn RawFs>,
        node: FileNodeHandle,
        physical_path: impl Into<String>,
        path_meta: Arc<PathMetaContainer>,
        raid: Option<RaidConfig>,
    ) -> Self {
        Self {
            raw,
            node,
            physical_path: physical_path.into(),
            path_meta,
            raid,
        }
    }

    pub fn path(&self) -> &str {
        self.node.path()
    }

    fn write_chunks(&self, temp_path: &str) -> FsResult<()> {
        let mut writer = self.raw.open_write(temp_path, self.raid.as_ref())?;
        match self.node.as_slice() {
            Some(data) => {
                for chunk in data.chunks(FLUSH_CHUNK_SIZE) {
                    writer.append(chunk)?;
                }
            }
            None => {
                let len = self.node.len();
                let mut buf = vec![0u8; FLUSH_CHUNK_SIZE.min(len as usize)];
                let mut offset = 0u64;
                while offset < len {
                    let n = self.node.read(&mut buf, offset, &ReadOption::default())?;
                    if n == 0 {
                        break;
                    }
                    writer.append(&buf[..n])?;
                    offset += n as u64;
                }
            }
        }
        writer.close()
    }
}

impl fmt::Debug for FileFlushOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileFlushOperation")
            .field("path", &self.node.path())
            .field("physical_path", &self.physical_path)
            .field("len", &self.node.len())
            .finish()
    }
}

impl Dumpable for FileFlushOperation {
    fn dump(&self) -> FsResult<()> {
        let temp_path = temp_path_for(&self.physical_path);
        if let Err(e) = self
            .write_chunks(&temp_path)
            .and_then(|()| self.raw.rename(&temp_path, &self.physical_path))
        {
            let _ = self.raw.delete(&temp_path, true);
            return Err(e);
        }
        self.path_meta
            .add_file_info(self.node.path(), FileMeta::file(self.node.len()));
        self.node.set_dirty(false);
        tracing::debug!(path = %self.node.path(), len = self.node.len(), "flushed file");
        Ok(())
    }

    fn flush_memory_use(&self) -> u64 {
        self.node.len()
    }
}

/// One queued flush operation.
#[derive(Debug)]
pub enum FlushOperation {
    Mkdir(MkdirFlushOperation),
    File(FileFlushOperation),
}

impl From<MkdirFlushOperation> for FlushOperation {
    fn from(op: MkdirFlushOperation) -> Self {
        FlushOperation::Mkdir(op)
    }
}

impl From<FileFlushOperation> for FlushOperation {
    fn from(op: FileFlushOperation) -> Self {
        FlushOperation::File(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::InMemFileNode;
    use crate::raw::MemoryFs;

    #[test]
    fn test_file_flush_writes_and_cleans() {
        let raw = Arc::new(MemoryFs::new());
        let metas = Arc::new(PathMetaContainer::new());
        let node = FileNodeHandle::from_node(InMemFileNode::new("/f", vec![5u8; 100], true));
        let op = FileFlushOperation::new(raw.clone(), node.clone(), "/f", metas.clone(), None);
        assert_eq!(node.use_count(), 2);
        assert_eq!(op.flush_memory_use(), 100);

        op.dump().unwrap();
        assert_eq!(raw.read_all("/f").unwrap(), vec![5u8; 100]);
        assert!(!node.is_dirty());
        assert_eq!(metas.get("/f").unwrap().length, 100);
        assert_eq!(raw.file_count(), 1);

        drop(op);
        assert_eq!(node.use_count(), 1);
    }

    #[test]
    fn test_file_flush_missing_parent_fails() {
        let raw = Arc::new(MemoryFs::new());
        let node = FileNodeHandle::from_node(InMemFileNode::new("/d/f", vec![1], true));
        let op = FileFlushOperation::new(
            raw.clone(),
            node.clone(),
            "/d/f",
            Arc::new(PathMetaContainer::new()),
            None,
        );
        assert!(op.dump().is_err());
        assert!(node.is_dirty());

        MkdirFlushOperation::new(raw.clone(), "/d").dump().unwrap();
        op.dump().unwrap();
        assert!(raw.exists("/d/f").unwrap());
    }
}

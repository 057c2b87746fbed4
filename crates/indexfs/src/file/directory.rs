use super::FileNode;
use crate::error::{FsError, FsResult};
use crate::types::{FsFileType, FsOpenType, ReadOption};

/// Structural directory entry. Always dirty; never dumped as content.
#[derive(Debug)]
pub struct DirectoryFileNode {
    path: String,
}

impl DirectoryFileNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl FileNode for DirectoryFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        FsFileType::Directory
    }

    fn open_type(&self) -> FsOpenType {
        FsOpenType::InMem
    }

    fn len(&self) -> u64 {
        0
    }

    fn read(&self, _buf: &mut [u8], _offset: u64, _option: &ReadOption) -> FsResult<usize> {
        Err(FsError::invalid_path(format!("{} is a directory", self.path)))
    }

    fn is_dirty(&self) -> bool {
        true
    }

    fn set_dirty(&self, _dirty: bool) {}
}

use std::sync::atomic::{AtomicBool, Ordering};

use super::{FileNode, FileNodeHandle};
use crate::error::{FsError, FsResult};
use crate::types::{FsFileType, FsOpenType, ReadOption};

/// Window `[offset, offset + len)` over a shared package data file.
///
/// Holds a handle on the physical node, so the data file's cache entry
/// stays busy while any inner file is open.
#[derive(Debug)]
pub struct PackageInnerFileNode {
    path: String,
    physical: FileNodeHandle,
    offset: u64,
    len: u64,
    dirty: AtomicBool,
}

impl PackageInnerFileNode {
    pub fn new(
        path: impl Into<String>,
        physical: FileNodeHandle,
        offset: u64,
        len: u64,
    ) -> FsResult<Self> {
        let path = path.into();
        if offset.checked_add(len).is_none_or(|end| end > physical.len()) {
            return Err(FsError::out_of_range(path, offset, len, physical.len()));
        }
        Ok(Self {
            path,
            physical,
            offset,
            len,
            dirty: AtomicBool::new(false),
        })
    }

    /// Offset of the window inside the data file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn physical(&self) -> &FileNodeHandle {
        &self.physical
    }
}

impl FileNode for PackageInnerFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        self.physical.file_type()
    }

    fn open_type(&self) -> FsOpenType {
        self.physical.open_type()
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let n = buf.len().min((self.len - offset) as usize);
        self.physical.read(&mut buf[..n], self.offset + offset, option)
    }

    fn as_slice(&self) -> Option<&[u8]> {
        let start = self.offset as usize;
        self.physical
            .as_slice()
            .map(|data| &data[start..start + self.len as usize])
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    fn in_package(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::InMemFileNode;

    #[test]
    fn test_window_read() {
        let physical = FileNodeHandle::from_node(InMemFileNode::new(
            "/p.__data__0",
            b"0123456789abcde".to_vec(),
            false,
        ));
        let node = PackageInnerFileNode::new("/p/f2", physical.clone(), 10, 5).unwrap();
        assert_eq!(node.as_slice().unwrap(), b"abcde");

        let mut buf = [0u8; 8];
        assert_eq!(node.read(&mut buf, 3, &ReadOption::default()).unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
        assert!(node.in_package());
        assert_eq!(physical.use_count(), 2);
    }

    #[test]
    fn test_window_past_end_rejected() {
        let physical =
            FileNodeHandle::from_node(InMemFileNode::new("/d", vec![0u8; 4], false));
        assert!(PackageInnerFileNode::new("/x", physical.clone(), 2, 3).is_err());
        assert!(PackageInnerFileNode::new("/x", physical, u64::MAX, 2).is_err());
    }
}

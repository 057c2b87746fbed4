use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::FileNode;
use crate::error::{FsError, FsResult};
use crate::raw::RawFs;
use crate::types::{FsFileType, FsOpenType, ReadOption};

pub(crate) fn copy_at(data: &[u8], buf: &mut [u8], offset: u64) -> usize {
    if offset >= data.len() as u64 {
        return 0;
    }
    let start = offset as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

/// Heap-resident file content.
#[derive(Debug)]
pub struct InMemFileNode {
    path: String,
    data: Vec<u8>,
    dirty: AtomicBool,
}

impl InMemFileNode {
    pub fn new(path: impl Into<String>, data: Vec<u8>, dirty: bool) -> Self {
        Self {
            path: path.into(),
            data,
            dirty: AtomicBool::new(dirty),
        }
    }

    /// Load a physical file fully into memory.
    pub fn load(raw: &dyn RawFs, path: &str, physical_path: &str) -> FsResult<Self> {
        let data = raw.read_all(physical_path)?;
        Ok(Self::new(path, data, false))
    }
}

impl FileNode for InMemFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        FsFileType::InMem
    }

    fn open_type(&self) -> FsOpenType {
        FsOpenType::InMem
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        option.count_blocks(1);
        Ok(copy_at(&self.data, buf, offset))
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}

/// Append-growable file made of fixed-size preallocated slices.
///
/// Slice files live only in a storage's cache and are never dumped.
#[derive(Debug)]
pub struct SliceFileNode {
    path: String,
    slice_len: usize,
    slice_num: usize,
    slices: RwLock<Vec<Vec<u8>>>,
}

impl SliceFileNode {
    pub fn new(path: impl Into<String>, slice_len: usize, slice_num: usize) -> FsResult<Self> {
        if slice_len == 0 || slice_num == 0 {
            return Err(FsError::invalid_argument("slice length and count must be positive"));
        }
        Ok(Self {
            path: path.into(),
            slice_len,
            slice_num,
            slices: RwLock::new(Vec::new()),
        })
    }

    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u64 {
        (self.slice_len * self.slice_num) as u64
    }

    /// Append bytes, opening new slices as earlier ones fill up.
    pub fn append(&self, mut data: &[u8]) -> FsResult<()> {
        let mut slices = self.slices.write();
        let used: usize = slices.iter().map(Vec::len).sum();
        if (used + data.len()) as u64 > self.capacity() {
            return Err(FsError::out_of_range(
                &self.path,
                used as u64,
                data.len() as u64,
                self.capacity(),
            ));
        }
        while !data.is_empty() {
            if slices.last().is_none_or(|s| s.len() == self.slice_len) {
                slices.push(Vec::with_capacity(self.slice_len));
            }
            if let Some(slice) = slices.last_mut() {
                let n = (self.slice_len - slice.len()).min(data.len());
                slice.extend_from_slice(&data[..n]);
                data = &data[n..];
            }
        }
        Ok(())
    }

    /// Copy of the whole content.
    pub fn to_vec(&self) -> Vec<u8> {
        self.slices.read().concat()
    }
}

impl FileNode for SliceFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        FsFileType::Slice
    }

    fn open_type(&self) -> FsOpenType {
        FsOpenType::Slice
    }

    fn len(&self) -> u64 {
        self.slices.read().iter().map(|s| s.len() as u64).sum()
    }

    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        let slices = self.slices.read();
        let mut filled = 0;
        let mut cursor = offset;
        while filled < buf.len() {
            let idx = (cursor / self.slice_len as u64) as usize;
            let Some(slice) = slices.get(idx) else { break };
            let in_slice = (cursor % self.slice_len as u64) as usize;
            if in_slice >= slice.len() {
                break;
            }
            let n = (slice.len() - in_slice).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&slice[in_slice..in_slice + n]);
            filled += n;
            cursor += n as u64;
            option.count_blocks(1);
        }
        Ok(filled)
    }

    fn is_dirty(&self) -> bool {
        false
    }

    fn set_dirty(&self, _dirty: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_mem_read() {
        let node = InMemFileNode::new("/f", b"hello".to_vec(), true);
        let mut buf = [0u8; 4];
        assert_eq!(node.read(&mut buf, 2, &ReadOption::default()).unwrap(), 3);
        assert_eq!(&buf[..3], b"llo");
        assert_eq!(node.read(&mut buf, 9, &ReadOption::default()).unwrap(), 0);
        assert!(node.is_dirty());
        node.set_dirty(false);
        assert!(!node.is_dirty());
    }

    #[test]
    fn test_slice_append_spans_slices() {
        let node = SliceFileNode::new("/s", 4, 3).unwrap();
        node.append(b"abcdef").unwrap();
        node.append(b"gh").unwrap();
        assert_eq!(node.len(), 8);
        assert_eq!(node.to_vec(), b"abcdefgh");

        let mut buf = [0u8; 5];
        assert_eq!(node.read(&mut buf, 2, &ReadOption::default()).unwrap(), 5);
        assert_eq!(&buf, b"cdefg");
    }

    #[test]
    fn test_slice_capacity() {
        let node = SliceFileNode::new("/s", 4, 2).unwrap();
        node.append(b"1234567").unwrap();
        assert!(node.append(b"89").is_err());
        assert_eq!(node.len(), 7);
    }
}

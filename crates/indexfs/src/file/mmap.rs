use memmap2::Mmap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::FileNode;
use super::in_mem::copy_at;
use crate::error::FsResult;
use crate::raw::RawFs;
use crate::types::{FsFileType, FsOpenType, ReadOption};

#[derive(Debug)]
enum Backing {
    Mapped(Mmap),
    Loaded(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => m,
            Backing::Loaded(v) => v,
        }
    }
}

/// Memory-mapped physical file.
///
/// When the raw filesystem cannot map (remote roots, empty files) or a
/// locked open is requested, the content is loaded into memory instead
/// and the node reports [`FsFileType::MmapLocked`].
#[derive(Debug)]
pub struct MmapFileNode {
    path: String,
    backing: Backing,
    dirty: AtomicBool,
}

impl MmapFileNode {
    pub fn open(raw: &dyn RawFs, path: &str, physical_path: &str, locked: bool) -> FsResult<Self> {
        let mapped = if locked { None } else { raw.mmap(physical_path)? };
        let backing = match mapped {
            Some(mmap) => Backing::Mapped(mmap),
            None => Backing::Loaded(raw.read_all(physical_path)?),
        };
        Ok(Self {
            path: path.to_string(),
            backing,
            dirty: AtomicBool::new(false),
        })
    }
}

impl FileNode for MmapFileNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn file_type(&self) -> FsFileType {
        match self.backing {
            Backing::Mapped(_) => FsFileType::Mmap,
            Backing::Loaded(_) => FsFileType::MmapLocked,
        }
    }

    fn open_type(&self) -> FsOpenType {
        FsOpenType::Mmap
    }

    fn len(&self) -> u64 {
        self.backing.bytes().len() as u64
    }

    fn read(&self, buf: &mut [u8], offset: u64, option: &ReadOption) -> FsResult<usize> {
        option.count_blocks(1);
        Ok(copy_at(self.backing.bytes(), buf, offset))
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(self.backing.bytes())
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}

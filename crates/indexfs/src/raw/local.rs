//! Local disk raw filesystem.

use memmap2::Mmap;
use std::fs;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::{RawFs, RawWriter};
use crate::error::{FsError, FsResult};
use crate::options::RaidConfig;
use crate::types::{FileMeta, system_time_secs};

/// Local filesystem access through `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    /// Create a local filesystem handle.
    pub fn new() -> Self {
        Self
    }

    fn walk(root: &Path, dir: &Path, recursive: bool, out: &mut Vec<String>) -> FsResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| FsError::io_at(&dir.to_string_lossy(), e))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().into_owned());
            }
            if recursive && entry.file_type()?.is_dir() {
                Self::walk(root, &path, recursive, out)?;
            }
        }
        Ok(())
    }
}

struct LocalWriter {
    path: String,
    file: BufWriter<fs::File>,
    written: u64,
}

impl RawWriter for LocalWriter {
    fn append(&mut self, data: &[u8]) -> FsResult<()> {
        self.file
            .write_all(data)
            .map_err(|e| FsError::io_at(&self.path, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.written
    }

    fn close(self: Box<Self>) -> FsResult<()> {
        let path = self.path;
        let file = self
            .file
            .into_inner()
            .map_err(|e| FsError::io_at(&path, e.into_error()))?;
        file.sync_data().map_err(|e| FsError::io_at(&path, e))
    }
}

impl RawFs for LocalFs {
    fn exists(&self, path: &str) -> FsResult<bool> {
        Ok(fs::symlink_metadata(path).is_ok())
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::io_at(path, e)),
        }
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        let meta = fs::metadata(path).map_err(|e| FsError::io_at(path, e))?;
        let modify_time = meta.modified().map(system_time_secs).unwrap_or(0);
        Ok(FileMeta {
            length: if meta.is_dir() { 0 } else { meta.len() },
            create_time: meta.created().map(system_time_secs).unwrap_or(modify_time),
            modify_time,
            is_dir: meta.is_dir(),
        })
    }

    fn list_dir(&self, path: &str, recursive: bool) -> FsResult<Vec<String>> {
        let root = Path::new(path);
        let mut out = Vec::new();
        Self::walk(root, root, recursive, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let file = fs::File::open(path).map_err(|e| FsError::io_at(path, e))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file
                .read_at(&mut buf[filled..], offset + filled as u64)
                .map_err(|e| FsError::io_at(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn open_write(&self, path: &str, _raid: Option<&RaidConfig>) -> FsResult<Box<dyn RawWriter>> {
        let file = fs::File::create(path).map_err(|e| FsError::io_at(path, e))?;
        Ok(Box::new(LocalWriter {
            path: path.to_string(),
            file: BufWriter::new(file),
            written: 0,
        }))
    }

    fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        fs::rename(src, dst).map_err(|e| FsError::io_at(src, e))
    }

    fn delete(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && may_non_exist => return Ok(()),
            Err(e) => return Err(FsError::io_at(path, e)),
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && may_non_exist => Ok(()),
            other => other.map_err(|e| FsError::io_at(path, e)),
        }
    }

    fn symlink(&self, src: &str, dst: &str) -> FsResult<()> {
        std::os::unix::fs::symlink(src, dst).map_err(|e| FsError::io_at(dst, e))
    }

    fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        let result = if recursive {
            fs::create_dir_all(path)
        } else {
            fs::create_dir(path)
        };
        result.map_err(|e| FsError::io_at(path, e))
    }

    fn mmap(&self, path: &str) -> FsResult<Option<Mmap>> {
        let file = fs::File::open(path).map_err(|e| FsError::io_at(path, e))?;
        let len = file.metadata().map_err(|e| FsError::io_at(path, e))?.len();
        if len == 0 {
            // Zero-length mappings are rejected on some platforms.
            return Ok(None);
        }
        // SAFETY: segment files are immutable once published (writers go
        // through a temporary path and an atomic rename), so the mapped
        // bytes are never modified underneath the mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| FsError::io_at(path, e))?;
        Ok(Some(mmap))
    }
}

//! Directory handles over an [`IndexFileSystem`].

use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::file::{FileReader, FileWriter, SliceFileNode};
use crate::filesystem::IndexFileSystem;
use crate::path;
use crate::types::{FileMeta, FsOpenType, WriterOption};

/// What a directory handle may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    /// Read and write through the file system.
    Normal,
    /// Write-only until [`Directory::close`] commits the package.
    Pack,
    /// Read-only; reads go through the root link.
    Link,
}

/// A directory inside an index file system.
///
/// Child paths are relative to the directory and may not escape it.
#[derive(Debug, Clone)]
pub struct Directory {
    fs: Arc<IndexFileSystem>,
    path: String,
    kind: DirectoryKind,
    /// Package root for pack directories; the directory itself otherwise.
    anchor: String,
}

impl Directory {
    pub(crate) fn new(fs: Arc<IndexFileSystem>, path: String, kind: DirectoryKind) -> Self {
        Self {
            fs,
            anchor: path.clone(),
            path,
            kind,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> DirectoryKind {
        self.kind
    }

    pub fn file_system(&self) -> &Arc<IndexFileSystem> {
        &self.fs
    }

    fn child(&self, rel: &str) -> FsResult<String> {
        let child = path::join(&self.path, rel)?;
        if !path::is_under(&child, &self.path) {
            return Err(FsError::invalid_path(format!("{rel} escapes {}", self.path)));
        }
        Ok(child)
    }

    fn writable(&self) -> FsResult<()> {
        match self.kind {
            DirectoryKind::Link => Err(FsError::unsupported(format!(
                "link directory {} is read-only",
                self.path
            ))),
            _ => Ok(()),
        }
    }

    pub fn create_file_reader(&self, rel: &str, open_type: FsOpenType) -> FsResult<FileReader> {
        let child = self.child(rel)?;
        match self.kind {
            DirectoryKind::Normal => self.fs.create_file_reader(&child, open_type),
            DirectoryKind::Link => self.fs.create_link_reader(&child, open_type),
            DirectoryKind::Pack => Err(FsError::unsupported(format!(
                "reading {child} from pack directory {} before close",
                self.anchor
            ))),
        }
    }

    /// Whole contents of a file.
    pub fn read_all(&self, rel: &str) -> FsResult<Vec<u8>> {
        self.create_file_reader(rel, FsOpenType::InMem)?.read_all()
    }

    pub fn create_file_writer(&self, rel: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        self.writable()?;
        let child = self.child(rel)?;
        self.fs.create_file_writer(&child, option)
    }

    /// Write a whole file in one call.
    pub fn write_file(&self, rel: &str, data: &[u8], option: &WriterOption) -> FsResult<()> {
        self.writable()?;
        let child = self.child(rel)?;
        self.fs.write_file(&child, data, option)
    }

    pub fn create_slice_file(
        &self,
        rel: &str,
        slice_len: usize,
        slice_num: usize,
    ) -> FsResult<Arc<SliceFileNode>> {
        self.writable()?;
        let child = self.child(rel)?;
        self.fs.create_slice_file(&child, slice_len, slice_num)
    }

    /// Create a subdirectory and return its handle, of the same kind.
    pub fn make_directory(&self, rel: &str, recursive: bool) -> FsResult<Directory> {
        self.writable()?;
        let child = self.child(rel)?;
        self.fs.make_directory(&child, recursive)?;
        Ok(self.subdirectory(child))
    }

    /// Handle on an existing subdirectory.
    pub fn get_directory(&self, rel: &str) -> FsResult<Directory> {
        let child = self.child(rel)?;
        if !self.fs.is_dir(&child)? {
            return Err(FsError::not_found(child));
        }
        Ok(self.subdirectory(child))
    }

    fn subdirectory(&self, path: String) -> Directory {
        Directory {
            fs: Arc::clone(&self.fs),
            path,
            kind: self.kind,
            anchor: self.anchor.clone(),
        }
    }

    pub fn remove_file(&self, rel: &str, may_non_exist: bool) -> FsResult<()> {
        self.writable()?;
        self.fs.remove_file(&self.child(rel)?, may_non_exist)
    }

    pub fn remove_directory(&self, rel: &str, may_non_exist: bool) -> FsResult<()> {
        self.writable()?;
        let child = self.child(rel)?;
        if child == self.path {
            return Err(FsError::invalid_path(format!("cannot remove {} from itself", self.path)));
        }
        self.fs.remove_directory(&child, may_non_exist)
    }

    pub fn is_exist(&self, rel: &str) -> FsResult<bool> {
        self.fs.is_exist(&self.child(rel)?)
    }

    pub fn is_dir(&self, rel: &str) -> FsResult<bool> {
        self.fs.is_dir(&self.child(rel)?)
    }

    pub fn file_length(&self, rel: &str) -> FsResult<u64> {
        self.fs.file_length(&self.child(rel)?)
    }

    pub fn file_meta(&self, rel: &str) -> FsResult<FileMeta> {
        self.fs.file_meta(&self.child(rel)?)
    }

    /// Entries under `rel` (`""` for this directory), relative and sorted.
    pub fn list_file(&self, rel: &str, recursive: bool) -> FsResult<Vec<String>> {
        self.fs.list_file(&self.child(rel)?, recursive)
    }

    /// Finish writing. A pack directory commits its package, which becomes
    /// readable through the file system; other kinds have nothing to do.
    pub fn close(&self) -> FsResult<()> {
        match self.kind {
            DirectoryKind::Pack => self.fs.commit_package(&self.anchor),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FileSystemOptions;
    use crate::raw::{MemoryFs, RawFs};

    fn fs(options: FileSystemOptions) -> (Arc<MemoryFs>, Arc<IndexFileSystem>) {
        let raw = Arc::new(MemoryFs::new());
        let fs = IndexFileSystem::new("/index", raw.clone(), options).unwrap();
        (raw, fs)
    }

    #[test]
    fn test_normal_directory_round_trip() {
        let (_raw, fs) = fs(FileSystemOptions::default());
        let root = fs.root_directory();
        let seg = root.make_directory("seg/attr", true).unwrap();
        seg.write_file("data", b"values", &WriterOption::default()).unwrap();

        assert_eq!(seg.path(), "/index/seg/attr");
        assert_eq!(root.read_all("seg/attr/data").unwrap(), b"values");
        assert_eq!(root.list_file("seg", true).unwrap(), vec!["attr", "attr/data"]);
        assert!(root.get_directory("seg/missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_child_paths_cannot_escape() {
        let (_raw, fs) = fs(FileSystemOptions::default());
        let seg = fs.root_directory().make_directory("seg", false).unwrap();
        assert!(matches!(seg.is_exist("../other"), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn test_pack_directory_commits_on_close() {
        let (raw, fs) = fs(FileSystemOptions::default());
        let pack = fs.pack_directory("/index/seg_pack").unwrap();
        let sub = pack.make_directory("index", false).unwrap();
        sub.write_file("dict", b"dictionary", &WriterOption::default()).unwrap();
        pack.write_file("meta", b"m", &WriterOption::default()).unwrap();
        assert!(matches!(
            pack.read_all("meta"),
            Err(FsError::Unsupported(_))
        ));

        sub.close().unwrap();
        assert!(raw.exists("/index/seg_pack.__meta__").unwrap());
        let dir = fs.directory("/index/seg_pack").unwrap();
        assert_eq!(dir.read_all("index/dict").unwrap(), b"dictionary");
        assert_eq!(dir.list_file("", true).unwrap(), vec!["index", "index/dict", "meta"]);
    }

    #[test]
    fn test_link_directory_is_read_only() {
        let (raw, fs) = fs(FileSystemOptions::default().use_root_link(true));
        raw.mkdir("/index/seg", false).unwrap();
        raw.write_all("/index/seg/f", b"x").unwrap();
        let link = fs.link_directory("/index/seg").unwrap();
        assert_eq!(link.read_all("f").unwrap(), b"x");
        assert!(matches!(
            link.write_file("g", b"y", &WriterOption::default()),
            Err(FsError::Unsupported(_))
        ));
    }
}

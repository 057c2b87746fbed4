use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{Storage, absent};
use crate::context::FileSystemContext;
use crate::error::{FsError, FsResult};
use crate::file::{FileReader, FileWriter, InMemFileWriter};
use crate::flush::FlushHandle;
use crate::package::{PAGE_SIZE, PackageFileMeta, PackageFileWriter};
use crate::path;
use crate::raw::RawFs;
use crate::types::{FileMeta, FsOpenType, FsStorageType, WriterOption};

#[derive(Debug, Default)]
struct PackBuffer {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    committed: bool,
}

impl PackBuffer {
    fn is_dir(&self, rel: &str) -> bool {
        rel.is_empty() || self.dirs.contains(rel)
    }

    fn is_exist(&self, rel: &str) -> bool {
        self.is_dir(rel) || self.files.contains_key(rel)
    }

    fn check_open(&self, root: &str) -> FsResult<()> {
        if self.committed {
            return Err(FsError::unsupported(format!("package {root} is already committed")));
        }
        Ok(())
    }
}

/// Write-only storage that gathers files under one root and commits them
/// as a single package whose primary path is that root.
///
/// Nothing is readable until the package is committed and mounted by the
/// disk storage.
#[derive(Debug)]
pub struct PackageStorage {
    raw: Arc<dyn RawFs>,
    context: Arc<FileSystemContext>,
    root: String,
    buffer: Arc<Mutex<PackBuffer>>,
}

impl PackageStorage {
    pub fn new(raw: Arc<dyn RawFs>, context: Arc<FileSystemContext>, root: &str) -> FsResult<Self> {
        Ok(Self {
            raw,
            context,
            root: path::normalize(root)?,
            buffer: Arc::new(Mutex::new(PackBuffer::default())),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn inner<'a>(&self, path: &'a str) -> FsResult<&'a str> {
        path::relative(path, &self.root)
            .ok_or_else(|| FsError::invalid_path(format!("{path} is outside package {}", self.root)))
    }

    fn require_parent(&self, buffer: &mut PackBuffer, rel: &str, create: bool) -> FsResult<()> {
        let Some((parent, _)) = rel.rsplit_once('/') else {
            return Ok(());
        };
        if buffer.is_dir(parent) {
            return Ok(());
        }
        if buffer.files.contains_key(parent) {
            return Err(FsError::already_exists(format!("{parent} is a file")));
        }
        if !create {
            return Err(FsError::not_found(path::join(&self.root, parent)?));
        }
        self.require_parent(buffer, parent, true)?;
        buffer.dirs.insert(parent.to_string());
        Ok(())
    }

    /// Write every buffered entry into one package at the root.
    ///
    /// The storage accepts no further writes afterwards.
    pub fn commit(&self) -> FsResult<PackageFileMeta> {
        let mut buffer = self.buffer.lock();
        buffer.check_open(&self.root)?;
        let mut writer = PackageFileWriter::create(
            Arc::clone(&self.raw),
            &self.root,
            PAGE_SIZE,
            self.context.options().raid_config.as_ref(),
        )?;
        for dir in &buffer.dirs {
            writer.add_directory(dir)?;
        }
        for (file, data) in &buffer.files {
            writer.add_file(file, data)?;
        }
        let meta = writer.commit()?;
        buffer.dirs.clear();
        buffer.files.clear();
        buffer.committed = true;
        Ok(meta)
    }

    pub fn is_committed(&self) -> bool {
        self.buffer.lock().committed
    }
}

impl Storage for PackageStorage {
    fn storage_type(&self) -> FsStorageType {
        FsStorageType::Package
    }

    fn create_file_reader(&self, path: &str, _open_type: FsOpenType) -> FsResult<FileReader> {
        Err(FsError::unsupported(format!(
            "reading {path} from package {} before it is committed",
            self.root
        )))
    }

    fn create_file_writer(&self, path: &str, option: &WriterOption) -> FsResult<Box<dyn FileWriter>> {
        let rel = self.inner(path)?;
        if rel.is_empty() {
            return Err(FsError::invalid_path(path));
        }
        {
            let mut buffer = self.buffer.lock();
            buffer.check_open(&self.root)?;
            if buffer.is_dir(rel) || (buffer.files.contains_key(rel) && !option.overwrite) {
                return Err(FsError::already_exists(path));
            }
            self.require_parent(&mut buffer, rel, option.create_parents)?;
        }
        let buffer = Arc::clone(&self.buffer);
        let rel = rel.to_string();
        Ok(Box::new(InMemFileWriter::new(
            path,
            option.expected_len.unwrap_or(0) as usize,
            Box::new(move |_path, data| {
                let mut buffer = buffer.lock();
                if buffer.committed {
                    return Err(FsError::unsupported(format!("{rel} closed after commit")));
                }
                buffer.files.insert(rel, data);
                Ok(())
            }),
        )))
    }

    fn make_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        let rel = self.inner(path)?;
        let mut buffer = self.buffer.lock();
        buffer.check_open(&self.root)?;
        if buffer.is_exist(rel) {
            if recursive && buffer.is_dir(rel) {
                return Ok(());
            }
            return Err(FsError::already_exists(path));
        }
        self.require_parent(&mut buffer, rel, recursive)?;
        buffer.dirs.insert(rel.to_string());
        Ok(())
    }

    fn remove_file(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let rel = self.inner(path)?;
        let mut buffer = self.buffer.lock();
        if buffer.is_dir(rel) {
            return Err(FsError::invalid_path(format!("{path} is a directory")));
        }
        if buffer.files.remove(rel).is_none() {
            return absent(path, may_non_exist);
        }
        Ok(())
    }

    fn remove_directory(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let rel = self.inner(path)?;
        if rel.is_empty() {
            return Err(FsError::invalid_path("cannot remove the package root"));
        }
        let mut buffer = self.buffer.lock();
        if !buffer.dirs.contains(rel) {
            if buffer.files.contains_key(rel) {
                return Err(FsError::invalid_path(format!("{path} is not a directory")));
            }
            return absent(path, may_non_exist);
        }
        let prefix = format!("{rel}/");
        buffer.dirs.retain(|d| d != rel && !d.starts_with(&prefix));
        buffer.files.retain(|f, _| !f.starts_with(&prefix));
        Ok(())
    }

    fn is_exist(&self, path: &str) -> FsResult<bool> {
        let rel = self.inner(path)?;
        Ok(self.buffer.lock().is_exist(rel))
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        let rel = self.inner(path)?;
        Ok(self.buffer.lock().is_dir(rel))
    }

    fn list_file(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        let rel = self.inner(dir)?;
        let buffer = self.buffer.lock();
        if !buffer.is_dir(rel) {
            return Err(FsError::not_found(dir));
        }
        let names: BTreeSet<&str> = buffer
            .dirs
            .iter()
            .map(String::as_str)
            .chain(buffer.files.keys().map(String::as_str))
            .filter_map(|p| {
                if rel.is_empty() {
                    Some(p)
                } else {
                    p.strip_prefix(rel).and_then(|rest| rest.strip_prefix('/'))
                }
            })
            .filter(|p| recursive || !p.contains('/'))
            .collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        let rel = self.inner(path)?;
        let buffer = self.buffer.lock();
        if buffer.is_dir(rel) {
            return Ok(FileMeta::directory());
        }
        buffer
            .files
            .get(rel)
            .map(|data| FileMeta::file(data.len() as u64))
            .ok_or_else(|| FsError::not_found(path))
    }

    fn sync(&self, _wait_finish: bool) -> FsResult<FlushHandle> {
        Ok(FlushHandle::ready(Ok(())))
    }

    fn clean_cache(&self) {}

    fn use_count(&self, _path: &str) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FileSystemOptions;
    use crate::package::meta_path;
    use crate::raw::MemoryFs;

    fn package() -> (Arc<MemoryFs>, PackageStorage) {
        let raw = Arc::new(MemoryFs::new());
        raw.mkdir("/idx", false).unwrap();
        let context = Arc::new(FileSystemContext::new(FileSystemOptions::default()));
        let storage = PackageStorage::new(raw.clone(), context, "/idx/pack").unwrap();
        (raw, storage)
    }

    fn write(storage: &PackageStorage, path: &str, data: &[u8]) {
        let mut writer = storage
            .create_file_writer(path, &WriterOption::default().with_create_parents())
            .unwrap();
        writer.write(data).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_buffered_until_commit() {
        let (raw, storage) = package();
        write(&storage, "/idx/pack/a/f1", b"one");
        write(&storage, "/idx/pack/f2", b"two");
        assert_eq!(storage.list_file("/idx/pack", true).unwrap(), vec!["a", "a/f1", "f2"]);
        assert_eq!(storage.file_length("/idx/pack/a/f1").unwrap(), 3);
        assert!(!raw.exists(&meta_path("/idx/pack")).unwrap());
        assert!(storage
            .create_file_reader("/idx/pack/f2", FsOpenType::InMem)
            .is_err());

        let meta = storage.commit().unwrap();
        assert_eq!(meta.inner_files.iter().filter(|e| !e.is_dir).count(), 2);
        assert!(raw.exists(&meta_path("/idx/pack")).unwrap());
        assert!(storage.is_committed());
        assert!(storage
            .create_file_writer("/idx/pack/g", &WriterOption::default())
            .is_err());
    }

    #[test]
    fn test_paths_outside_root_are_rejected() {
        let (_raw, storage) = package();
        assert!(storage
            .create_file_writer("/idx/other", &WriterOption::default())
            .is_err());
    }

    #[test]
    fn test_remove_buffered_entries() {
        let (_raw, storage) = package();
        storage.make_directory("/idx/pack/d/e", true).unwrap();
        write(&storage, "/idx/pack/d/e/f", b"x");
        write(&storage, "/idx/pack/dd", b"y");
        storage.remove_directory("/idx/pack/d", false).unwrap();
        assert_eq!(storage.list_file("/idx/pack", true).unwrap(), vec!["dd"]);
        storage.remove_file("/idx/pack/dd", false).unwrap();
        assert!(storage.remove_file("/idx/pack/dd", false).unwrap_err().is_not_found());
    }
}

//! In-process raw filesystem.
//!
//! Stands in for a remote store in tests and for secondary roots. All
//! data is lost when dropped.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{RawFs, RawWriter};
use crate::error::{FsError, FsResult};
use crate::options::RaidConfig;
use crate::path;
use crate::types::FileMeta;

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Arc<Vec<u8>>, meta: FileMeta },
    Directory { meta: FileMeta },
    Symlink { target: String },
}

/// Thread-safe in-memory filesystem keyed by normalized absolute path.
#[derive(Debug, Clone)]
pub struct MemoryFs {
    entries: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a new filesystem holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            Entry::Directory {
                meta: FileMeta::directory(),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Number of stored files (directories excluded).
    pub fn file_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| matches!(e, Entry::File { .. }))
            .count()
    }

    fn resolve(&self, path: &str) -> FsResult<String> {
        let mut current = path::normalize(path)?;
        'follow: for _ in 0..8 {
            let entries = self.entries.read();
            let mut prefix_end = 0;
            while prefix_end < current.len() {
                prefix_end = current[prefix_end + 1..]
                    .find('/')
                    .map(|i| i + prefix_end + 1)
                    .unwrap_or(current.len());
                if let Some(Entry::Symlink { target }) = entries.get(&current[..prefix_end]) {
                    let rest = &current[prefix_end..];
                    current = path::normalize(&format!("{target}{rest}"))?;
                    continue 'follow;
                }
            }
            return Ok(current);
        }
        Err(FsError::other(format!("too many symbolic links: {path}")))
    }

    fn require_parent(entries: &BTreeMap<String, Entry>, path: &str) -> FsResult<()> {
        match path::parent(path) {
            None => Ok(()),
            Some(parent) => match entries.get(parent) {
                Some(Entry::Directory { .. }) => Ok(()),
                Some(_) => Err(FsError::invalid_path(format!("{parent} is not a directory"))),
                None => Err(FsError::not_found(parent)),
            },
        }
    }
}

struct MemoryWriter {
    fs: MemoryFs,
    path: String,
    buffer: Vec<u8>,
}

impl RawWriter for MemoryWriter {
    fn append(&mut self, data: &[u8]) -> FsResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn close(self: Box<Self>) -> FsResult<()> {
        let mut entries = self.fs.entries.write();
        MemoryFs::require_parent(&entries, &self.path)?;
        let meta = FileMeta::file(self.buffer.len() as u64);
        entries.insert(
            self.path,
            Entry::File {
                data: Arc::new(self.buffer),
                meta,
            },
        );
        Ok(())
    }
}

impl RawFs for MemoryFs {
    fn exists(&self, path: &str) -> FsResult<bool> {
        let normalized = path::normalize(path)?;
        Ok(self.entries.read().contains_key(&normalized))
    }

    fn is_dir(&self, path: &str) -> FsResult<bool> {
        let resolved = self.resolve(path)?;
        Ok(matches!(
            self.entries.read().get(&resolved),
            Some(Entry::Directory { .. })
        ))
    }

    fn file_meta(&self, path: &str) -> FsResult<FileMeta> {
        let resolved = self.resolve(path)?;
        match self.entries.read().get(&resolved) {
            Some(Entry::File { meta, .. }) | Some(Entry::Directory { meta }) => Ok(*meta),
            Some(Entry::Symlink { .. }) => Err(FsError::other("dangling symlink")),
            None => Err(FsError::not_found(resolved)),
        }
    }

    fn list_dir(&self, dir: &str, recursive: bool) -> FsResult<Vec<String>> {
        let resolved = self.resolve(dir)?;
        let entries = self.entries.read();
        match entries.get(&resolved) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(FsError::invalid_path(format!("not a directory: {resolved}"))),
            None => return Err(FsError::not_found(resolved)),
        }
        let (lower, upper) = path::subtree_range(&resolved);
        let mut out: Vec<String> = entries
            .range(lower..upper)
            .filter(|(p, _)| **p != resolved)
            .filter_map(|(p, _)| path::relative(p, &resolved).map(str::to_string))
            .filter(|rel| recursive || !rel.contains('/'))
            .collect();
        out.sort();
        Ok(out)
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let resolved = self.resolve(path)?;
        match self.entries.read().get(&resolved) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = (start + buf.len()).min(data.len());
                buf[..end - start].copy_from_slice(&data[start..end]);
                Ok(end - start)
            }
            Some(_) => Err(FsError::invalid_path(format!("not a file: {resolved}"))),
            None => Err(FsError::not_found(resolved)),
        }
    }

    fn open_write(&self, path: &str, _raid: Option<&RaidConfig>) -> FsResult<Box<dyn RawWriter>> {
        let normalized = path::normalize(path)?;
        Self::require_parent(&self.entries.read(), &normalized)?;
        Ok(Box::new(MemoryWriter {
            fs: self.clone(),
            path: normalized,
            buffer: Vec::new(),
        }))
    }

    fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        let mut entries = self.entries.write();
        Self::require_parent(&entries, &dst)?;
        let entry = entries
            .remove(&src)
            .ok_or_else(|| FsError::not_found(src.clone()))?;

        if matches!(entry, Entry::Directory { .. }) {
            let (lower, upper) = path::subtree_range(&src);
            let children: Vec<String> = entries.range(lower..upper).map(|(k, _)| k.clone()).collect();
            for child in children {
                if let Some(child_entry) = entries.remove(&child) {
                    let rel = &child[src.len()..];
                    entries.insert(format!("{dst}{rel}"), child_entry);
                }
            }
        }
        entries.insert(dst, entry);
        Ok(())
    }

    fn delete(&self, path: &str, may_non_exist: bool) -> FsResult<()> {
        let normalized = path::normalize(path)?;
        if normalized == "/" {
            return Err(FsError::invalid_path("cannot remove root"));
        }
        let mut entries = self.entries.write();
        match entries.remove(&normalized) {
            Some(Entry::Directory { .. }) => {
                let (lower, upper) = path::subtree_range(&normalized);
                let children: Vec<String> =
                    entries.range(lower..upper).map(|(k, _)| k.clone()).collect();
                for child in children {
                    entries.remove(&child);
                }
                Ok(())
            }
            Some(_) => Ok(()),
            None if may_non_exist => Ok(()),
            None => Err(FsError::not_found(normalized)),
        }
    }

    fn symlink(&self, src: &str, dst: &str) -> FsResult<()> {
        let dst = path::normalize(dst)?;
        let mut entries = self.entries.write();
        Self::require_parent(&entries, &dst)?;
        if entries.contains_key(&dst) {
            return Err(FsError::already_exists(dst));
        }
        entries.insert(
            dst,
            Entry::Symlink {
                target: src.to_string(),
            },
        );
        Ok(())
    }

    fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        let normalized = path::normalize(path)?;
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&normalized) {
            return match existing {
                Entry::Directory { .. } if recursive => Ok(()),
                _ => Err(FsError::already_exists(normalized)),
            };
        }
        if recursive {
            let mut current = String::new();
            for component in normalized.split('/').filter(|c| !c.is_empty()) {
                current.push('/');
                current.push_str(component);
                match entries.get(&current) {
                    Some(Entry::Directory { .. }) => {}
                    Some(_) => return Err(FsError::already_exists(current)),
                    None => {
                        entries.insert(
                            current.clone(),
                            Entry::Directory {
                                meta: FileMeta::directory(),
                            },
                        );
                    }
                }
            }
            Ok(())
        } else {
            Self::require_parent(&entries, &normalized)?;
            entries.insert(
                normalized,
                Entry::Directory {
                    meta: FileMeta::directory(),
                },
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_read() {
        let fs = MemoryFs::new();
        fs.mkdir("/a", false).unwrap();
        fs.write_all("/a/test.txt", b"hello world").unwrap();

        let mut buf = [0u8; 5];
        fs.read("/a/test.txt", &mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(fs.read_all("/a/test.txt").unwrap(), b"hello world");
    }

    #[test]
    fn test_write_requires_parent() {
        let fs = MemoryFs::new();
        let err = fs.write_all("/missing/f", b"x").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_dir() {
        let fs = MemoryFs::new();
        fs.mkdir("/a/b", true).unwrap();
        fs.write_all("/a/b/f", b"1").unwrap();
        fs.write_all("/a/g", b"2").unwrap();
        fs.write_all("/ab", b"3").unwrap();

        assert_eq!(fs.list_dir("/a", false).unwrap(), vec!["b", "g"]);
        assert_eq!(fs.list_dir("/a", true).unwrap(), vec!["b", "b/f", "g"]);
    }

    #[test]
    fn test_delete_directory_tree() {
        let fs = MemoryFs::new();
        fs.mkdir("/a/b", true).unwrap();
        fs.write_all("/a/b/f", b"1").unwrap();
        fs.write_all("/a/bbb", b"2").unwrap();

        fs.delete("/a/b", false).unwrap();
        assert!(!fs.exists("/a/b/f").unwrap());
        assert!(fs.exists("/a/bbb").unwrap());
        assert!(fs.delete("/a/b", false).unwrap_err().is_not_found());
        fs.delete("/a/b", true).unwrap();
    }

    #[test]
    fn test_rename_directory() {
        let fs = MemoryFs::new();
        fs.mkdir("/src/sub", true).unwrap();
        fs.write_all("/src/sub/f", b"content").unwrap();
        fs.rename("/src", "/dst").unwrap();

        assert!(!fs.exists("/src/sub/f").unwrap());
        assert_eq!(fs.read_all("/dst/sub/f").unwrap(), b"content");
    }

    #[test]
    fn test_symlink_follow() {
        let fs = MemoryFs::new();
        fs.mkdir("/real", false).unwrap();
        fs.write_all("/real/f", b"x").unwrap();
        fs.symlink("/real", "/link").unwrap();

        assert!(fs.is_dir("/link").unwrap());
        assert_eq!(fs.list_dir("/link", false).unwrap(), vec!["f"]);
    }
}

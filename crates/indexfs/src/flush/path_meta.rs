use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::path;
use crate::types::FileMeta;

/// Lengths and timestamps of files this process has written, so stat
/// calls on them never reach the raw filesystem.
#[derive(Debug, Default)]
pub struct PathMetaContainer {
    metas: Mutex<BTreeMap<String, FileMeta>>,
}

impl PathMetaContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file_info(&self, path: &str, meta: FileMeta) {
        self.metas.lock().insert(path.to_string(), meta);
    }

    pub fn get(&self, path: &str) -> Option<FileMeta> {
        self.metas.lock().get(path).copied()
    }

    pub fn remove_file(&self, path: &str) -> bool {
        self.metas.lock().remove(path).is_some()
    }

    /// Forget `dir` and everything below it.
    pub fn remove_directory(&self, dir: &str) {
        let mut metas = self.metas.lock();
        let (lower, upper) = path::subtree_range(dir);
        let doomed: Vec<String> = metas.range(lower..upper).map(|(k, _)| k.clone()).collect();
        for k in doomed {
            metas.remove(&k);
        }
        metas.remove(dir);
    }

    pub fn len(&self) -> usize {
        self.metas.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_directory() {
        let metas = PathMetaContainer::new();
        metas.add_file_info("/a/b/f", FileMeta::file(3));
        metas.add_file_info("/a/bb", FileMeta::file(4));
        metas.remove_directory("/a/b");
        assert!(metas.get("/a/b/f").is_none());
        assert_eq!(metas.get("/a/bb").unwrap().length, 4);
    }
}

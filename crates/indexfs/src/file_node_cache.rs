//! Path-keyed registry of live file nodes for one storage.
//!
//! The sorted map is what makes subtree listing and subtree removal a
//! single range scan. Removal is gated on exclusive ownership: an entry
//! leaves the cache only while the cache's own handle is the sole holder.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::file::FileNodeHandle;
use crate::metrics::StorageMetrics;
use crate::path;
use crate::types::FsFileType;

#[derive(Debug)]
struct CacheEntry {
    handle: FileNodeHandle,
    /// Length the metrics were charged with; moved by `truncate`.
    metric_len: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    nodes: BTreeMap<String, CacheEntry>,
    holders: HashMap<String, Arc<AtomicUsize>>,
}

impl CacheState {
    fn is_exclusive(&self, path: &str) -> bool {
        self.holders
            .get(path)
            .is_none_or(|h| h.load(Ordering::Acquire) <= 1)
    }
}

#[derive(Debug)]
pub struct FileNodeCache {
    state: Mutex<CacheState>,
    metrics: Arc<StorageMetrics>,
}

impl FileNodeCache {
    pub fn new(metrics: Arc<StorageMetrics>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<StorageMetrics> {
        &self.metrics
    }

    /// Insert a node, replacing any entry at the same path.
    pub fn insert(&self, handle: FileNodeHandle) {
        let path = handle.path().to_string();
        let len = handle.len();
        let file_type = handle.file_type();
        let mut state = self.state.lock();
        if let Some(old) = state.nodes.remove(&path) {
            if old.handle.use_count() > 1 {
                tracing::warn!(
                    path = %path,
                    use_count = old.handle.use_count(),
                    "replacing a cached node that is still referenced"
                );
            }
            self.metrics
                .decrease_file(old.handle.file_type(), old.metric_len);
        }
        self.metrics.increase_file(file_type, len);
        state.holders.insert(path.clone(), handle.holders());
        state.nodes.insert(
            path,
            CacheEntry {
                handle,
                metric_len: len,
            },
        );
    }

    /// Check out the node at `path`.
    pub fn find(&self, path: &str) -> Option<FileNodeHandle> {
        self.state
            .lock()
            .nodes
            .get(path)
            .map(|entry| entry.handle.clone())
    }

    pub fn is_exist(&self, path: &str) -> bool {
        self.state.lock().holders.contains_key(path)
    }

    /// Whether the cached entry at `path` is a directory.
    pub fn is_directory(&self, path: &str) -> bool {
        self.state
            .lock()
            .nodes
            .get(path)
            .is_some_and(|e| e.handle.file_type() == FsFileType::Directory)
    }

    /// Remove one file entry.
    ///
    /// Returns false, leaving the cache unchanged, when the path is not
    /// cached, is a directory, or has holders besides the cache.
    pub fn remove_file(&self, path: &str) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.nodes.get(path) else {
            return false;
        };
        if entry.handle.file_type() == FsFileType::Directory {
            tracing::debug!(path, "refusing to remove a directory as a file");
            return false;
        }
        if !state.is_exclusive(path) {
            tracing::debug!(path, use_count = entry.handle.use_count(), "file is still in use");
            return false;
        }
        self.erase(&mut state, path);
        true
    }

    /// Remove a directory entry and every descendant.
    ///
    /// Fails as a whole if the directory or any descendant has holders
    /// besides the cache.
    pub fn remove_directory(&self, dir: &str) -> bool {
        let mut state = self.state.lock();
        let (lower, upper) = path::subtree_range(dir);
        let mut doomed: Vec<String> = state
            .nodes
            .range(lower..upper)
            .map(|(p, _)| p.clone())
            .filter(|p| p != dir)
            .collect();
        if state.nodes.contains_key(dir) {
            doomed.push(dir.to_string());
        }
        if let Some(busy) = doomed.iter().find(|p| !state.is_exclusive(p)) {
            tracing::debug!(dir, path = %busy, "directory has a node in use");
            return false;
        }
        for p in &doomed {
            self.erase(&mut state, p);
        }
        true
    }

    fn erase(&self, state: &mut CacheState, path: &str) {
        state.holders.remove(path);
        if let Some(entry) = state.nodes.remove(path) {
            self.metrics
                .decrease_file(entry.handle.file_type(), entry.metric_len);
        }
    }

    /// Cached paths under `dir`, relative to it and sorted.
    ///
    /// `physical_only` skips nodes that are windows into package files.
    pub fn list_file(&self, dir: &str, recursive: bool, physical_only: bool) -> Vec<String> {
        let state = self.state.lock();
        let (lower, upper) = path::subtree_range(dir);
        state
            .nodes
            .range(lower..upper)
            .filter(|(p, _)| p.as_str() != dir)
            .filter(|(_, e)| !(physical_only && e.handle.in_package()))
            .filter_map(|(p, _)| path::relative(p, dir).map(str::to_string))
            .filter(|rel| recursive || !rel.contains('/'))
            .collect()
    }

    /// Move the charged length of a cached file. Content is untouched.
    pub fn truncate(&self, path: &str, new_len: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.nodes.get_mut(path) {
            self.metrics
                .adjust_length(entry.handle.file_type(), entry.metric_len, new_len);
            entry.metric_len = new_len;
        }
    }

    /// Evict every clean node nobody else holds.
    pub fn clean(&self) {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, e)| !e.handle.is_dirty() && e.handle.use_count() <= 1)
            .map(|(p, _)| p.clone())
            .collect();
        for p in &doomed {
            self.erase(&mut state, p);
        }
        if !doomed.is_empty() {
            tracing::debug!(evicted = doomed.len(), "cleaned file node cache");
        }
    }

    /// [`clean`](Self::clean) restricted to `paths`.
    pub fn clean_files(&self, paths: &[String]) {
        let mut state = self.state.lock();
        for p in paths {
            let evict = state
                .nodes
                .get(p)
                .is_some_and(|e| !e.handle.is_dirty() && e.handle.use_count() <= 1);
            if evict {
                self.erase(&mut state, p);
            }
        }
    }

    /// Holders of the node at `path` including the cache; 0 when absent.
    pub fn get_use_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .holders
            .get(path)
            .map_or(0, |h| h.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

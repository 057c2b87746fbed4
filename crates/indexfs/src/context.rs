use std::sync::Arc;

use crate::flush::PathMetaContainer;
use crate::metrics::StorageMetrics;
use crate::options::FileSystemOptions;

/// State shared by every storage of one file system instance.
#[derive(Debug)]
pub struct FileSystemContext {
    options: FileSystemOptions,
    metrics: Arc<StorageMetrics>,
    path_meta: Arc<PathMetaContainer>,
}

impl FileSystemContext {
    pub fn new(options: FileSystemOptions) -> Self {
        let metrics = Arc::new(StorageMetrics::new(options.metric_preference));
        Self {
            options,
            metrics,
            path_meta: Arc::new(PathMetaContainer::new()),
        }
    }

    pub fn options(&self) -> &FileSystemOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<StorageMetrics> {
        &self.metrics
    }

    pub fn path_meta(&self) -> &Arc<PathMetaContainer> {
        &self.path_meta
    }
}

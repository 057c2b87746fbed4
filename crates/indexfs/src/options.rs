//! File-system configuration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::block::BlockCache;

/// How much detail the storage metrics keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricPreference {
    /// No metrics at all.
    None,
    /// Totals only.
    #[default]
    Summary,
    /// Totals plus per-file-type counters.
    Detail,
}

/// Parameters forwarded to a remote filesystem that stripes new files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidConfig {
    /// Data blocks per stripe.
    pub data_block_num: u32,
    /// Parity blocks per stripe.
    pub parity_block_num: u32,
}

/// Tracks bytes held by in-memory storage against a quota.
///
/// Exceeding the quota is reported, not refused; the dump pipeline is what
/// relieves memory pressure.
#[derive(Debug)]
pub struct MemoryQuotaController {
    quota: u64,
    used: AtomicU64,
}

impl MemoryQuotaController {
    /// Create a controller with a byte quota.
    pub fn new(quota: u64) -> Self {
        Self {
            quota,
            used: AtomicU64::new(0),
        }
    }

    /// Account for `bytes` more bytes.
    pub fn allocate(&self, bytes: u64) {
        let used = self.used.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if used > self.quota {
            tracing::warn!(used, quota = self.quota, "memory quota exceeded");
        }
    }

    /// Return `bytes` bytes to the quota.
    pub fn free(&self, bytes: u64) {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes);
            match self
                .used
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bytes currently accounted.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Configured quota.
    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Whether usage is above the quota.
    pub fn is_exceeded(&self) -> bool {
        self.used() > self.quota
    }
}

/// Configuration for an [`IndexFileSystem`](crate::IndexFileSystem).
#[derive(Debug, Clone)]
pub struct FileSystemOptions {
    /// Metric detail level (default: Summary).
    pub metric_preference: MetricPreference,

    /// Queue in-memory files for dump (default: true).
    pub need_flush: bool,

    /// Dump on a background worker instead of the caller's thread
    /// (default: false).
    pub enable_async_flush: bool,

    /// Publish disk readers' nodes into the file node cache (default: true).
    pub use_cache: bool,

    /// Serve `LinkDirectory` reads through a root symlink (default: false).
    pub use_root_link: bool,

    /// Never dump in-memory files; disk writers may defer parent creation
    /// (default: false).
    pub prohibit_in_mem_dump: bool,

    /// Offline build mode: clean the cache after every sync (default: false).
    pub is_offline: bool,

    /// Accounts in-memory bytes (default: none).
    pub memory_quota_controller: Option<Arc<MemoryQuotaController>>,

    /// Shared block cache for `Cache` opens (default: none, which degrades
    /// `Cache` opens to buffered reads).
    pub block_cache: Option<Arc<BlockCache>>,

    /// Forwarded to the raw filesystem on file creation (default: none).
    pub raid_config: Option<RaidConfig>,
}

impl Default for FileSystemOptions {
    fn default() -> Self {
        Self {
            metric_preference: MetricPreference::Summary,
            need_flush: true,
            enable_async_flush: false,
            use_cache: true,
            use_root_link: false,
            prohibit_in_mem_dump: false,
            is_offline: false,
            memory_quota_controller: None,
            block_cache: None,
            raid_config: None,
        }
    }
}

impl FileSystemOptions {
    /// Set metric detail level.
    pub fn metric_preference(mut self, preference: MetricPreference) -> Self {
        self.metric_preference = preference;
        self
    }

    /// Enable or disable dumping of in-memory files.
    pub fn need_flush(mut self, enabled: bool) -> Self {
        self.need_flush = enabled;
        self
    }

    /// Enable background dumping.
    pub fn enable_async_flush(mut self, enabled: bool) -> Self {
        self.enable_async_flush = enabled;
        self
    }

    /// Enable or disable the disk reader cache.
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    /// Enable the root link.
    pub fn use_root_link(mut self, enabled: bool) -> Self {
        self.use_root_link = enabled;
        self
    }

    /// Prohibit dumping in-memory files.
    pub fn prohibit_in_mem_dump(mut self, enabled: bool) -> Self {
        self.prohibit_in_mem_dump = enabled;
        self
    }

    /// Set offline mode.
    pub fn is_offline(mut self, enabled: bool) -> Self {
        self.is_offline = enabled;
        self
    }

    /// Attach a memory quota controller.
    pub fn memory_quota_controller(mut self, controller: Arc<MemoryQuotaController>) -> Self {
        self.memory_quota_controller = Some(controller);
        self
    }

    /// Attach a shared block cache.
    pub fn block_cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.block_cache = Some(cache);
        self
    }

    /// Set raid parameters.
    pub fn raid_config(mut self, config: RaidConfig) -> Self {
        self.raid_config = Some(config);
        self
    }

    /// Whether in-memory files are queued for dump.
    pub(crate) fn should_dump(&self) -> bool {
        self.need_flush && !self.prohibit_in_mem_dump
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FileSystemOptions::default();
        assert_eq!(options.metric_preference, MetricPreference::Summary);
        assert!(options.need_flush);
        assert!(!options.enable_async_flush);
        assert!(options.use_cache);
        assert!(options.block_cache.is_none());
        assert!(options.should_dump());
    }

    #[test]
    fn test_options_builder() {
        let options = FileSystemOptions::default()
            .enable_async_flush(true)
            .prohibit_in_mem_dump(true)
            .is_offline(true)
            .raid_config(RaidConfig {
                data_block_num: 6,
                parity_block_num: 3,
            });
        assert!(options.enable_async_flush);
        assert!(options.is_offline);
        assert!(!options.should_dump());
        assert_eq!(options.raid_config.unwrap().parity_block_num, 3);
    }

    #[test]
    fn test_memory_quota() {
        let quota = MemoryQuotaController::new(100);
        quota.allocate(60);
        assert!(!quota.is_exceeded());
        quota.allocate(60);
        assert!(quota.is_exceeded());
        quota.free(200);
        assert_eq!(quota.used(), 0);
    }
}

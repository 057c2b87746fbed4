//! Storage metrics kept by the file node caches.

use std::sync::atomic::{AtomicU64, Ordering};
use strum::EnumCount;

use crate::options::MetricPreference;
use crate::types::FsFileType;

#[derive(Debug, Default)]
struct Counter {
    files: AtomicU64,
    bytes: AtomicU64,
}

impl Counter {
    fn add(&self, files: u64, bytes: u64) {
        self.files.fetch_add(files, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn sub(&self, files: u64, bytes: u64) {
        saturating_sub(&self.files, files);
        saturating_sub(&self.bytes, bytes);
    }
}

fn saturating_sub(value: &AtomicU64, delta: u64) {
    let _ = value.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(delta))
    });
}

/// File count and byte totals, overall and per [`FsFileType`].
#[derive(Debug)]
pub struct StorageMetrics {
    preference: MetricPreference,
    total: Counter,
    per_type: [Counter; FsFileType::COUNT],
}

impl StorageMetrics {
    pub fn new(preference: MetricPreference) -> Self {
        Self {
            preference,
            total: Counter::default(),
            per_type: std::array::from_fn(|_| Counter::default()),
        }
    }

    pub fn preference(&self) -> MetricPreference {
        self.preference
    }

    pub(crate) fn increase_file(&self, file_type: FsFileType, len: u64) {
        match self.preference {
            MetricPreference::None => {}
            MetricPreference::Summary => self.total.add(1, len),
            MetricPreference::Detail => {
                self.total.add(1, len);
                self.per_type[file_type.index()].add(1, len);
            }
        }
    }

    pub(crate) fn decrease_file(&self, file_type: FsFileType, len: u64) {
        match self.preference {
            MetricPreference::None => {}
            MetricPreference::Summary => self.total.sub(1, len),
            MetricPreference::Detail => {
                self.total.sub(1, len);
                self.per_type[file_type.index()].sub(1, len);
            }
        }
    }

    /// Length change of a cached file (truncate).
    pub(crate) fn adjust_length(&self, file_type: FsFileType, old_len: u64, new_len: u64) {
        self.decrease_file(file_type, old_len);
        self.increase_file(file_type, new_len);
    }

    /// Cached files across all types.
    pub fn file_count(&self) -> u64 {
        self.total.files.load(Ordering::Relaxed)
    }

    /// Cached bytes across all types.
    pub fn total_bytes(&self) -> u64 {
        self.total.bytes.load(Ordering::Relaxed)
    }

    /// Cached files of one type; always zero unless `Detail`.
    pub fn file_count_of(&self, file_type: FsFileType) -> u64 {
        self.per_type[file_type.index()].files.load(Ordering::Relaxed)
    }

    /// Cached bytes of one type; always zero unless `Detail`.
    pub fn bytes_of(&self, file_type: FsFileType) -> u64 {
        self.per_type[file_type.index()].bytes.load(Ordering::Relaxed)
    }
}

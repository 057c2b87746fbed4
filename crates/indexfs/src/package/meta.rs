//! Package file meta: the JSON document describing a package's inner
//! files and physical data files.

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

/// Inner file alignment must be a multiple of this.
pub const PAGE_SIZE: u64 = 4096;

const META_SUFFIX: &str = ".__meta__";
const DATA_SUFFIX: &str = ".__data__";

/// Path of the meta file for package primary path `primary`.
pub fn meta_path(primary: &str) -> String {
    format!("{primary}{META_SUFFIX}")
}

/// Path of data file `idx` for package primary path `primary`.
pub fn data_path(primary: &str, idx: usize) -> String {
    format!("{primary}{DATA_SUFFIX}{idx}")
}

/// One inner file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerFileEntry {
    /// Path relative to the package primary path.
    pub path: String,
    pub is_dir: bool,
    pub offset: u64,
    pub length: u64,
    /// Index into the physical file vectors; unused for directories.
    pub file_idx: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFileMeta {
    pub inner_files: Vec<InnerFileEntry>,
    /// Data file names, relative to the primary path's parent.
    pub physical_file_names: Vec<String>,
    pub physical_file_lengths: Vec<u64>,
    pub physical_file_tags: Vec<String>,
    pub file_align_size: u64,
}

impl PackageFileMeta {
    pub fn new(file_align_size: u64) -> Self {
        Self {
            inner_files: Vec::new(),
            physical_file_names: Vec::new(),
            physical_file_lengths: Vec::new(),
            physical_file_tags: Vec::new(),
            file_align_size,
        }
    }

    pub fn from_json(bytes: &[u8]) -> FsResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| FsError::corruption(format!("package meta is not valid json: {e}")))
    }

    pub fn to_json(&self) -> FsResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| FsError::other(format!("failed to serialize package meta: {e}")))
    }

    /// Shape checks that do not need the data files.
    pub fn validate(&self) -> FsResult<()> {
        let names = self.physical_file_names.len();
        if names != self.physical_file_lengths.len() || names != self.physical_file_tags.len() {
            return Err(FsError::corruption(format!(
                "package file is broken: {} names, {} lengths, {} tags",
                names,
                self.physical_file_lengths.len(),
                self.physical_file_tags.len()
            )));
        }
        if self.file_align_size == 0 || self.file_align_size % PAGE_SIZE != 0 {
            return Err(FsError::corruption(format!(
                "package file is broken: align size {} is not a multiple of {PAGE_SIZE}",
                self.file_align_size
            )));
        }
        for entry in self.inner_files.iter().filter(|e| !e.is_dir) {
            let Some(&physical_len) = self.physical_file_lengths.get(entry.file_idx as usize)
            else {
                return Err(FsError::corruption(format!(
                    "package file is broken: {} references data file {}",
                    entry.path, entry.file_idx
                )));
            };
            if entry.offset.checked_add(entry.length).is_none_or(|end| end > physical_len) {
                return Err(FsError::corruption(format!(
                    "package file is broken: {} [{}, +{}) exceeds data file length {}",
                    entry.path, entry.offset, entry.length, physical_len
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> PackageFileMeta {
        let mut meta = PackageFileMeta::new(PAGE_SIZE);
        meta.physical_file_names.push("pkg.__data__0".to_string());
        meta.physical_file_lengths.push(15);
        meta.physical_file_tags.push(String::new());
        meta.inner_files.push(InnerFileEntry {
            path: "f1".to_string(),
            is_dir: false,
            offset: 0,
            length: 10,
            file_idx: 0,
        });
        meta
    }

    #[test]
    fn test_naming() {
        assert_eq!(meta_path("/seg/pkg"), "/seg/pkg.__meta__");
        assert_eq!(data_path("/seg/pkg", 2), "/seg/pkg.__data__2");
    }

    #[test]
    fn test_json_round_trip() {
        let meta = sample_meta();
        let parsed = PackageFileMeta::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(parsed, meta);
        assert!(PackageFileMeta::from_json(b"{not json").unwrap_err().is_corruption());
    }

    #[test]
    fn test_validate_vector_lengths() {
        let mut meta = sample_meta();
        meta.validate().unwrap();
        meta.physical_file_tags.push("extra".to_string());
        assert!(meta.validate().unwrap_err().is_corruption());
    }

    #[test]
    fn test_validate_alignment_and_bounds() {
        let mut meta = sample_meta();
        meta.file_align_size = 1000;
        assert!(meta.validate().is_err());

        let mut meta = sample_meta();
        meta.inner_files[0].length = 20;
        assert!(meta.validate().is_err());

        let mut meta = sample_meta();
        meta.inner_files[0].offset = u64::MAX - 4;
        assert!(meta.validate().unwrap_err().is_corruption());
    }
}

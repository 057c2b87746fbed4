use std::collections::BTreeSet;
use std::sync::Arc;

use super::meta::{self, InnerFileEntry, PAGE_SIZE, PackageFileMeta};
use crate::error::{FsError, FsResult};
use crate::file::temp_path_for;
use crate::options::RaidConfig;
use crate::path;
use crate::raw::{RawFs, RawWriter};

/// Builds one package: a single data file holding every inner file at an
/// aligned offset, then the meta file.
///
/// The meta is written last, so a crash mid-build leaves a package that
/// simply is not there rather than one that mounts with missing data.
pub struct PackageFileWriter {
    raw: Arc<dyn RawFs>,
    primary_path: String,
    temp_data_path: String,
    data: Box<dyn RawWriter>,
    meta: PackageFileMeta,
    dirs: BTreeSet<String>,
    files: BTreeSet<String>,
}

impl PackageFileWriter {
    pub fn create(
        raw: Arc<dyn RawFs>,
        primary_path: &str,
        file_align_size: u64,
        raid: Option<&RaidConfig>,
    ) -> FsResult<Self> {
        if file_align_size == 0 || file_align_size % PAGE_SIZE != 0 {
            return Err(FsError::invalid_argument(format!(
                "align size {file_align_size} is not a multiple of {PAGE_SIZE}"
            )));
        }
        let primary_path = path::normalize(primary_path)?;
        let temp_data_path = temp_path_for(&meta::data_path(&primary_path, 0));
        let data = raw.open_write(&temp_data_path, raid)?;
        Ok(Self {
            raw,
            primary_path,
            temp_data_path,
            data,
            meta: PackageFileMeta::new(file_align_size),
            dirs: BTreeSet::new(),
            files: BTreeSet::new(),
        })
    }

    pub fn primary_path(&self) -> &str {
        &self.primary_path
    }

    /// Add a directory and its missing ancestors.
    pub fn add_directory(&mut self, inner_path: &str) -> FsResult<()> {
        let inner = inner_relative(inner_path)?;
        let mut prefix = String::new();
        for component in inner.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if self.files.contains(&prefix) {
                return Err(FsError::already_exists(format!(
                    "{prefix} is a file in package {}",
                    self.primary_path
                )));
            }
            self.dirs.insert(prefix.clone());
        }
        Ok(())
    }

    /// Append one inner file at the next aligned offset.
    pub fn add_file(&mut self, inner_path: &str, data: &[u8]) -> FsResult<()> {
        let inner = inner_relative(inner_path)?;
        if self.files.contains(&inner) || self.dirs.contains(&inner) {
            return Err(FsError::already_exists(format!(
                "{inner} in package {}",
                self.primary_path
            )));
        }
        if let Some(parent) = inner.rsplit_once('/').map(|(p, _)| p.to_string()) {
            self.add_directory(&parent)?;
        }

        let align = self.meta.file_align_size;
        let offset = self.data.len().div_ceil(align) * align;
        let padding = (offset - self.data.len()) as usize;
        if padding > 0 {
            self.data.append(&vec![0u8; padding])?;
        }
        self.data.append(data)?;
        self.meta.inner_files.push(InnerFileEntry {
            path: inner.clone(),
            is_dir: false,
            offset,
            length: data.len() as u64,
            file_idx: 0,
        });
        self.files.insert(inner);
        Ok(())
    }

    /// Publish the data file, then the meta.
    pub fn commit(self) -> FsResult<PackageFileMeta> {
        let Self {
            raw,
            primary_path,
            temp_data_path,
            data,
            mut meta,
            dirs,
            ..
        } = self;

        let data_len = data.len();
        let data_path = meta::data_path(&primary_path, 0);
        data.close()?;
        raw.rename(&temp_data_path, &data_path)?;

        meta.physical_file_names
            .push(path::file_name(&data_path).to_string());
        meta.physical_file_lengths.push(data_len);
        meta.physical_file_tags.push(String::new());
        meta.inner_files.extend(dirs.into_iter().map(|dir| InnerFileEntry {
            path: dir,
            is_dir: true,
            offset: 0,
            length: 0,
            file_idx: 0,
        }));
        meta.validate()?;

        let meta_path = meta::meta_path(&primary_path);
        let temp_meta_path = temp_path_for(&meta_path);
        raw.write_all(&temp_meta_path, &meta.to_json()?)?;
        raw.rename(&temp_meta_path, &meta_path)?;
        tracing::info!(
            package = %primary_path,
            files = meta.inner_files.iter().filter(|e| !e.is_dir).count(),
            bytes = data_len,
            "committed package file"
        );
        Ok(meta)
    }
}

fn inner_relative(inner_path: &str) -> FsResult<String> {
    let normalized = path::normalize(inner_path)?;
    if normalized == "/" {
        return Err(FsError::invalid_path("empty inner path"));
    }
    Ok(normalized.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::MemoryFs;

    #[test]
    fn test_commit_aligns_and_writes_meta() {
        let raw = Arc::new(MemoryFs::new());
        raw.mkdir("/seg", false).unwrap();
        let mut writer = PackageFileWriter::create(raw.clone(), "/seg/pkg", PAGE_SIZE, None).unwrap();
        writer.add_file("f1", &[1u8; 10]).unwrap();
        writer.add_file("sub/f2", &[2u8; 5]).unwrap();
        let meta = writer.commit().unwrap();

        let f2 = meta.inner_files.iter().find(|e| e.path == "sub/f2").unwrap();
        assert_eq!(f2.offset, PAGE_SIZE);
        assert!(meta.inner_files.iter().any(|e| e.path == "sub" && e.is_dir));
        assert_eq!(meta.physical_file_lengths, vec![PAGE_SIZE + 5]);

        let on_disk = PackageFileMeta::from_json(&raw.read_all("/seg/pkg.__meta__").unwrap()).unwrap();
        assert_eq!(on_disk, meta);
        assert_eq!(
            raw.file_meta("/seg/pkg.__data__0").unwrap().length,
            PAGE_SIZE + 5
        );
    }

    #[test]
    fn test_duplicate_inner_file_rejected() {
        let raw = Arc::new(MemoryFs::new());
        let mut writer = PackageFileWriter::create(raw, "/pkg", PAGE_SIZE, None).unwrap();
        writer.add_file("f", b"x").unwrap();
        assert!(writer.add_file("f", b"y").is_err());
        assert!(writer.add_directory("f/g").is_err());
    }

    #[test]
    fn test_bad_alignment_rejected() {
        let raw = Arc::new(MemoryFs::new());
        assert!(PackageFileWriter::create(raw, "/pkg", 100, None).is_err());
    }
}

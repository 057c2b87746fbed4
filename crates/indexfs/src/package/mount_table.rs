//! Reference-counted mapping of package inner files onto shared physical
//! data files.

use parking_lot::Mutex;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::meta::{self, PackageFileMeta};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::raw::RawFs;
use crate::resolver::PhysicalPathResolver;

/// Where one logical inner path lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerFileMeta {
    /// Physical data file; for directories, the `;`-joined meta files of
    /// every package contributing to it.
    pub physical_path: String,
    pub offset: u64,
    pub length: u64,
    pub is_dir: bool,
    /// Primary path of the owning package (first one, for directories).
    pub package: String,
}

impl InnerFileMeta {
    pub fn physical_paths(&self) -> impl Iterator<Item = &str> {
        self.physical_path.split(';').filter(|p| !p.is_empty())
    }
}

#[derive(Debug)]
struct PhysicalFileInfo {
    /// Data file path before resolution.
    primary_path: String,
    ref_count: usize,
}

#[derive(Debug)]
struct PackageMetaInfo {
    physical_meta_path: String,
    primary_meta_path: String,
    /// `(primary, physical)` of every data file the meta lists.
    data_files: Vec<(String, String)>,
    /// Live file entries; a directory-only package stays at 0 until its
    /// root entry is removed.
    ref_count: usize,
}

#[derive(Debug, Default)]
struct MountState {
    mounted: HashSet<String>,
    inner: BTreeMap<String, InnerFileMeta>,
    physical_files: HashMap<String, PhysicalFileInfo>,
    package_metas: HashMap<String, PackageMetaInfo>,
    physical_path_cache: HashMap<(String, bool), String>,
}

/// Mounted packages of one storage.
///
/// Every file entry holds one reference on its data file and one on its
/// package's meta file. A physical file is deleted when its count reaches
/// zero, under the same lock as the decrement.
#[derive(Debug)]
pub struct PackageFileMountTable {
    raw: Arc<dyn RawFs>,
    resolver: Arc<dyn PhysicalPathResolver>,
    state: Mutex<MountState>,
}

impl PackageFileMountTable {
    pub fn new(raw: Arc<dyn RawFs>, resolver: Arc<dyn PhysicalPathResolver>) -> Self {
        Self {
            raw,
            resolver,
            state: Mutex::new(MountState::default()),
        }
    }

    fn physical_path(&self, state: &mut MountState, primary: &str, for_dump: bool) -> FsResult<String> {
        let key = (primary.to_string(), for_dump);
        if let Some(cached) = state.physical_path_cache.get(&key) {
            return Ok(cached.clone());
        }
        let resolved = self.resolver.resolve(self.raw.as_ref(), primary, for_dump)?;
        state.physical_path_cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Memoized physical path for `primary`.
    pub fn get_physical_path(&self, primary: &str, for_dump: bool) -> FsResult<String> {
        let mut state = self.state.lock();
        self.physical_path(&mut state, primary, for_dump)
    }

    /// Mount the package at primary path `primary`.
    ///
    /// Returns `Ok(false)` when the package has no meta file, and is a
    /// no-op when it is already mounted. Nothing is published unless the
    /// whole package validates.
    pub fn mount_package_file(&self, primary: &str) -> FsResult<bool> {
        let primary = path::normalize(primary)?;
        let mut state = self.state.lock();
        if state.mounted.contains(&primary) {
            return Ok(true);
        }
        state.physical_path_cache.clear();

        let primary_meta_path = meta::meta_path(&primary);
        let physical_meta_path = self.physical_path(&mut state, &primary_meta_path, false)?;
        if !self.raw.exists(&physical_meta_path)? {
            tracing::debug!(package = %primary, "no package meta");
            return Ok(false);
        }
        let meta = PackageFileMeta::from_json(&self.raw.read_all(&physical_meta_path)?)?;
        meta.validate()?;

        let package_dir = path::parent(&primary)
            .ok_or_else(|| FsError::invalid_path("package at the root"))?
            .to_string();
        let mut data_files = Vec::with_capacity(meta.physical_file_names.len());
        for (name, &expected) in meta
            .physical_file_names
            .iter()
            .zip(&meta.physical_file_lengths)
        {
            let primary_data = path::join(&package_dir, name)?;
            let physical = self.physical_path(&mut state, &primary_data, false)?;
            let actual = self.raw.file_meta(&physical)?.length;
            if actual != expected {
                return Err(FsError::corruption(format!(
                    "package file is broken: {physical} has length {actual}, meta records {expected}"
                )));
            }
            data_files.push((primary_data, physical));
        }

        let mut staged = vec![(
            primary.clone(),
            InnerFileMeta {
                physical_path: physical_meta_path.clone(),
                offset: 0,
                length: 0,
                is_dir: true,
                package: primary.clone(),
            },
        )];
        for entry in &meta.inner_files {
            let logical = path::join(&primary, &entry.path)?;
            let physical_path = if entry.is_dir {
                physical_meta_path.clone()
            } else {
                data_files[entry.file_idx as usize].1.clone()
            };
            staged.push((
                logical,
                InnerFileMeta {
                    physical_path,
                    offset: entry.offset,
                    length: entry.length,
                    is_dir: entry.is_dir,
                    package: primary.clone(),
                },
            ));
        }
        if let Some((logical, _)) = staged.iter().find(|(logical, staged_meta)| {
            state
                .inner
                .get(logical)
                .is_some_and(|existing| !(existing.is_dir && staged_meta.is_dir))
        }) {
            return Err(FsError::already_exists(format!(
                "{logical} conflicts with a mounted package entry"
            )));
        }

        let mut file_count = 0;
        for (logical, inner) in staged {
            if inner.is_dir {
                match state.inner.entry(logical) {
                    Entry::Occupied(mut existing) => {
                        let existing = existing.get_mut();
                        if !existing.physical_paths().any(|p| p == inner.physical_path) {
                            existing.physical_path.push(';');
                            existing.physical_path.push_str(&inner.physical_path);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(inner);
                    }
                }
                continue;
            }
            let primary_data = data_files
                .iter()
                .find(|(_, physical)| *physical == inner.physical_path)
                .map(|(p, _)| p.clone())
                .unwrap_or_else(|| inner.physical_path.clone());
            state
                .physical_files
                .entry(inner.physical_path.clone())
                .or_insert(PhysicalFileInfo {
                    primary_path: primary_data,
                    ref_count: 0,
                })
                .ref_count += 1;
            file_count += 1;
            state.inner.insert(logical, inner);
        }
        state.package_metas.insert(
            primary.clone(),
            PackageMetaInfo {
                physical_meta_path,
                primary_meta_path,
                data_files,
                ref_count: file_count,
            },
        );
        state.mounted.insert(primary.clone());
        tracing::info!(package = %primary, files = file_count, "mounted package file");
        Ok(true)
    }

    pub fn is_mounted(&self, primary: &str) -> bool {
        self.state.lock().mounted.contains(primary)
    }

    pub fn get_mount_meta(&self, path: &str) -> Option<InnerFileMeta> {
        self.state.lock().inner.get(path).cloned()
    }

    pub fn is_exist(&self, path: &str) -> bool {
        self.state.lock().inner.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state
            .lock()
            .inner
            .get(path)
            .is_some_and(|m| m.is_dir)
    }

    /// Mounted inner paths under `dir`, relative to it and sorted.
    pub fn list_file(&self, dir: &str, recursive: bool) -> Vec<String> {
        let state = self.state.lock();
        let (lower, upper) = path::subtree_range(dir);
        state
            .inner
            .range(lower..upper)
            .filter(|(p, _)| p.as_str() != dir)
            .filter_map(|(p, _)| path::relative(p, dir).map(str::to_string))
            .filter(|rel| recursive || !rel.contains('/'))
            .collect()
    }

    /// References held on a physical data file; 0 when untracked.
    pub fn physical_ref_count(&self, physical: &str) -> usize {
        self.state
            .lock()
            .physical_files
            .get(physical)
            .map_or(0, |info| info.ref_count)
    }

    /// Unmount one inner file. Returns false when it is not mounted.
    pub fn remove_file(&self, path: &str) -> FsResult<bool> {
        let mut state = self.state.lock();
        match state.inner.get(path) {
            None => return Ok(false),
            Some(m) if m.is_dir => {
                return Err(FsError::invalid_path(format!("{path} is a directory")));
            }
            Some(_) => {}
        }
        if let Some(removed) = state.inner.remove(path) {
            self.release(&mut state, &removed)?;
        }
        Ok(true)
    }

    /// Unmount a directory and everything below it. Returns false when
    /// nothing was mounted there.
    pub fn remove_directory(&self, dir: &str) -> FsResult<bool> {
        let mut state = self.state.lock();
        let (lower, upper) = path::subtree_range(dir);
        let mut doomed: Vec<String> = state
            .inner
            .range(lower..upper)
            .map(|(p, _)| p.clone())
            .filter(|p| p != dir)
            .collect();
        if state.inner.contains_key(dir) {
            doomed.push(dir.to_string());
        }
        if doomed.is_empty() {
            return Ok(false);
        }
        for p in doomed {
            let Some(removed) = state.inner.remove(&p) else {
                continue;
            };
            if !removed.is_dir {
                self.release(&mut state, &removed)?;
            } else if state.package_metas.get(&p).is_some_and(|package| package.ref_count == 0) {
                self.drop_package(&mut state, &p)?;
            }
        }
        Ok(true)
    }

    fn release(&self, state: &mut MountState, removed: &InnerFileMeta) -> FsResult<()> {
        if let Some(info) = state.physical_files.get_mut(&removed.physical_path) {
            info.ref_count -= 1;
            if info.ref_count == 0 {
                let primary_data = info.primary_path.clone();
                state.physical_files.remove(&removed.physical_path);
                self.delete_physical(&removed.physical_path, &primary_data)?;
            }
        } else {
            tracing::warn!(path = %removed.physical_path, "untracked package data file");
        }

        let Some(package) = state.package_metas.get_mut(&removed.package) else {
            return Ok(());
        };
        package.ref_count -= 1;
        if package.ref_count > 0 {
            return Ok(());
        }
        let package = removed.package.clone();
        self.drop_package(state, &package)
    }

    /// Forget a package with no live files and delete its meta, along with
    /// any data file no mounted entry references.
    fn drop_package(&self, state: &mut MountState, primary: &str) -> FsResult<()> {
        let Some(package) = state.package_metas.remove(primary) else {
            return Ok(());
        };
        for (primary_data, physical) in &package.data_files {
            if !state.physical_files.contains_key(physical) {
                self.delete_physical(physical, primary_data)?;
            }
        }
        self.delete_physical(&package.physical_meta_path, &package.primary_meta_path)?;
        state.mounted.remove(primary);
        let meta_path = package.physical_meta_path;
        state.inner.retain(|_, m| {
            if !m.is_dir {
                return true;
            }
            let rest = m
                .physical_paths()
                .filter(|p| *p != meta_path)
                .collect::<Vec<_>>()
                .join(";");
            if rest.is_empty() {
                return false;
            }
            m.physical_path = rest;
            true
        });
        tracing::info!(package = primary, "package fully removed");
        Ok(())
    }

    fn delete_physical(&self, physical: &str, primary: &str) -> FsResult<()> {
        if !self.resolver.may_delete(physical, primary) {
            tracing::debug!(path = physical, "keeping package file on read-only root");
            return Ok(());
        }
        self.raw.delete(physical, true)?;
        tracing::debug!(path = physical, "deleted package file");
        Ok(())
    }

    /// Forget every mount without touching physical files.
    pub fn clear(&self) {
        *self.state.lock() = MountState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PAGE_SIZE, PackageFileWriter};
    use crate::raw::MemoryFs;
    use crate::resolver::IdentityResolver;

    fn setup() -> (Arc<MemoryFs>, PackageFileMountTable) {
        let raw = Arc::new(MemoryFs::new());
        raw.mkdir("/seg", false).unwrap();
        let mut writer = PackageFileWriter::create(raw.clone(), "/seg/pkg", PAGE_SIZE, None).unwrap();
        writer.add_file("f1", &[1u8; 10]).unwrap();
        writer.add_file("dir/f2", &[2u8; 5]).unwrap();
        writer.commit().unwrap();
        let table = PackageFileMountTable::new(raw.clone(), Arc::new(IdentityResolver));
        (raw, table)
    }

    #[test]
    fn test_mount_is_idempotent() {
        let (_raw, table) = setup();
        assert!(table.mount_package_file("/seg/pkg").unwrap());
        assert!(table.mount_package_file("/seg/pkg").unwrap());
        assert_eq!(table.physical_ref_count("/seg/pkg.__data__0"), 2);

        let f1 = table.get_mount_meta("/seg/pkg/f1").unwrap();
        assert_eq!((f1.offset, f1.length, f1.is_dir), (0, 10, false));
        assert!(table.is_dir("/seg/pkg/dir"));
        assert!(table.is_dir("/seg/pkg"));
        assert_eq!(table.list_file("/seg/pkg", false), vec!["dir", "f1"]);
        assert_eq!(table.list_file("/seg/pkg", true), vec!["dir", "dir/f2", "f1"]);
    }

    #[test]
    fn test_missing_meta_is_not_an_error() {
        let (_raw, table) = setup();
        assert!(!table.mount_package_file("/seg/other").unwrap());
    }

    #[test]
    fn test_length_mismatch_is_corruption() {
        let (raw, table) = setup();
        raw.write_all("/seg/pkg.__data__0", b"short").unwrap();
        let err = table.mount_package_file("/seg/pkg").unwrap_err();
        assert!(err.is_corruption());
        assert!(!table.is_exist("/seg/pkg/f1"));
    }

    #[test]
    fn test_last_removal_deletes_physical_files() {
        let (raw, table) = setup();
        table.mount_package_file("/seg/pkg").unwrap();

        assert!(table.remove_file("/seg/pkg/f1").unwrap());
        assert!(raw.exists("/seg/pkg.__data__0").unwrap());
        assert!(!table.remove_file("/seg/pkg/f1").unwrap());

        assert!(table.remove_directory("/seg/pkg/dir").unwrap());
        assert!(!raw.exists("/seg/pkg.__data__0").unwrap());
        assert!(!raw.exists("/seg/pkg.__meta__").unwrap());
        assert!(!table.is_mounted("/seg/pkg"));
        assert!(!table.is_exist("/seg/pkg"));
    }

    #[test]
    fn test_directory_only_package_is_dropped_with_its_root() {
        let (raw, table) = setup();
        let mut writer = PackageFileWriter::create(raw.clone(), "/seg/empty", PAGE_SIZE, None).unwrap();
        writer.add_directory("a/b").unwrap();
        writer.commit().unwrap();
        assert!(table.mount_package_file("/seg/empty").unwrap());
        assert!(table.mount_package_file("/seg/pkg").unwrap());
        assert!(table.is_dir("/seg/empty/a/b"));

        assert!(table.remove_directory("/seg/empty/a").unwrap());
        assert!(table.is_mounted("/seg/empty"));
        assert!(raw.exists("/seg/empty.__meta__").unwrap());

        assert!(table.remove_directory("/seg/empty").unwrap());
        assert!(!table.is_mounted("/seg/empty"));
        assert!(!raw.exists("/seg/empty.__meta__").unwrap());
        assert!(!raw.exists("/seg/empty.__data__0").unwrap());
        assert!(!table.mount_package_file("/seg/empty").unwrap());

        assert!(table.is_mounted("/seg/pkg"));
        assert_eq!(table.physical_ref_count("/seg/pkg.__data__0"), 2);
    }

    #[test]
    fn test_remove_file_on_directory_errors() {
        let (_raw, table) = setup();
        table.mount_package_file("/seg/pkg").unwrap();
        assert!(table.remove_file("/seg/pkg/dir").is_err());
    }
}

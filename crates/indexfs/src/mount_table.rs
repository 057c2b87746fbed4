//! Mount table with longest-prefix routing.
//!
//! Routes a logical path to the storage that owns it: a mounted in-memory
//! or package root, the multi storage for paths above mounted roots, or
//! disk storage for everything else.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::FileSystemContext;
use crate::error::{FsError, FsResult};
use crate::path;
use crate::raw::RawFs;
use crate::storage::{InMemStorage, MultiStorage, PackageStorage, Storage};
use crate::types::FsStorageType;

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g. "/idx/segment_0").
    pub path: String,
    pub storage_type: FsStorageType,
}

#[derive(Debug, Clone)]
enum MountPoint {
    InMem,
    Package(Arc<PackageStorage>),
}

impl MountPoint {
    fn storage_type(&self) -> FsStorageType {
        match self {
            MountPoint::InMem => FsStorageType::InMem,
            MountPoint::Package(_) => FsStorageType::Package,
        }
    }
}

/// Routes paths under one file-system root to its storages.
///
/// Mount points are matched by longest prefix: with `/idx/a` and
/// `/idx/a/b/c` both mounted, `/idx/a/b/c/d` belongs to `/idx/a/b/c`.
#[derive(Debug)]
pub struct MountTable {
    root: String,
    raw: Arc<dyn RawFs>,
    context: Arc<FileSystemContext>,
    in_mem: Arc<InMemStorage>,
    disk: Arc<dyn Storage>,
    multi: Arc<MultiStorage>,
    mounts: RwLock<BTreeMap<String, MountPoint>>,
}

impl MountTable {
    pub fn new(
        root: &str,
        raw: Arc<dyn RawFs>,
        context: Arc<FileSystemContext>,
        disk: Arc<dyn Storage>,
    ) -> FsResult<Self> {
        let in_mem = InMemStorage::new(Arc::clone(&raw), Arc::clone(&context))?;
        let multi = MultiStorage::new(in_mem.clone(), Arc::clone(&disk));
        Ok(Self {
            root: path::normalize(root)?,
            raw,
            context,
            in_mem: Arc::new(in_mem),
            disk,
            multi: Arc::new(multi),
            mounts: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn in_mem(&self) -> &Arc<InMemStorage> {
        &self.in_mem
    }

    pub fn disk(&self) -> &Arc<dyn Storage> {
        &self.disk
    }

    fn longest_match<'a>(
        mounts: &'a BTreeMap<String, MountPoint>,
        path: &str,
    ) -> Option<(&'a String, &'a MountPoint)> {
        mounts
            .iter()
            .filter(|(root, _)| path::is_under(path, root))
            .max_by_key(|(root, _)| root.len())
    }

    /// Longest mounted root containing `path`.
    pub fn get_first_match_path(&self, path: &str) -> Option<String> {
        let mounts = self.mounts.read();
        Self::longest_match(&mounts, path).map(|(root, _)| root.clone())
    }

    /// Storage owning `path`.
    pub fn get_storage(&self, path: &str) -> Arc<dyn Storage> {
        let mounts = self.mounts.read();
        if let Some((_, mount)) = Self::longest_match(&mounts, path) {
            return match mount {
                MountPoint::InMem => self.in_mem.clone() as Arc<dyn Storage>,
                MountPoint::Package(storage) => storage.clone() as Arc<dyn Storage>,
            };
        }
        if path == self.root || mounts.keys().any(|root| path::is_strictly_under(root, path)) {
            return self.multi.clone() as Arc<dyn Storage>;
        }
        Arc::clone(&self.disk)
    }

    /// Mount an in-memory or package storage at `path`.
    pub fn mount(&self, path: &str, storage_type: FsStorageType) -> FsResult<()> {
        if path == self.root {
            return Err(FsError::invalid_path(format!("cannot mount the root {path}")));
        }
        if !path::is_strictly_under(path, &self.root) {
            return Err(FsError::invalid_path(format!("{path} is outside {}", self.root)));
        }
        if !storage_type.is_mountable() {
            return Err(FsError::unsupported(format!("mounting {storage_type} storage")));
        }

        let mut mounts = self.mounts.write();
        let enclosing = Self::longest_match(&mounts, path)
            .filter(|(ancestor, _)| ancestor.as_str() != path)
            .map(|(ancestor, mount)| (ancestor.clone(), mount.storage_type()));
        if let Some((ancestor, ancestor_type)) = enclosing {
            drop(mounts);
            if ancestor_type == FsStorageType::InMem && storage_type == FsStorageType::InMem {
                return self.in_mem.make_directory(path, true);
            }
            return Err(FsError::unsupported(format!(
                "mounting {storage_type} storage {path} inside {ancestor_type} root {ancestor}"
            )));
        }
        if mounts.contains_key(path) || self.disk.is_exist(path)? {
            return Err(FsError::already_exists(path));
        }
        let parent = path::parent(path).ok_or_else(|| FsError::invalid_path(path))?;
        if !self.disk.is_dir(parent)? {
            return Err(FsError::not_found(parent));
        }

        let mount = match storage_type {
            FsStorageType::InMem => {
                self.in_mem.add_root(path)?;
                MountPoint::InMem
            }
            _ => MountPoint::Package(Arc::new(PackageStorage::new(
                Arc::clone(&self.raw),
                Arc::clone(&self.context),
                path,
            )?)),
        };
        mounts.insert(path.to_string(), mount);
        tracing::info!(path, %storage_type, "mounted storage");
        Ok(())
    }

    /// Forget the mount at exactly `path`.
    ///
    /// Returns `true` if a mount was removed, `false` if nothing was mounted there.
    pub fn unmount(&self, path: &str) -> bool {
        let removed = self.mounts.write().remove(path);
        if let Some(mount) = &removed {
            tracing::info!(path, storage_type = %mount.storage_type(), "unmounted storage");
        }
        removed.is_some()
    }

    /// Forget every mount at or below `dir`.
    pub fn unmount_under(&self, dir: &str) {
        self.mounts.write().retain(|root, _| !path::is_under(root, dir));
    }

    /// Commit the package mounted at `path`, then serve it from disk.
    pub fn commit_package(&self, path: &str) -> FsResult<()> {
        let storage = match self.mounts.read().get(path) {
            Some(MountPoint::Package(storage)) => Arc::clone(storage),
            _ => return Err(FsError::not_found(format!("package mount {path}"))),
        };
        storage.commit()?;
        self.unmount(path);
        if !self.disk.mount_package_file(path)? {
            return Err(FsError::corruption(format!(
                "package {path} has no meta after commit"
            )));
        }
        Ok(())
    }

    /// List all current mounts.
    pub fn list_mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .read()
            .iter()
            .map(|(path, mount)| MountInfo {
                path: path.clone(),
                storage_type: mount.storage_type(),
            })
            .collect()
    }
}

//! Logical to physical path resolution.

use std::fmt;

use crate::error::{FsError, FsResult};
use crate::path;
use crate::raw::RawFs;

/// Maps logical paths to physical ones.
pub trait PhysicalPathResolver: Send + Sync + fmt::Debug {
    /// Physical locations for `logical`, preferred first.
    fn candidates(&self, logical: &str) -> FsResult<Vec<String>>;

    /// Physical path to use for `logical`.
    ///
    /// Dumps always target the preferred location; reads take the first
    /// candidate that exists, falling back to the preferred one.
    fn resolve(&self, raw: &dyn RawFs, logical: &str, for_dump: bool) -> FsResult<String> {
        let candidates = self.candidates(logical)?;
        if !for_dump {
            for candidate in &candidates {
                if raw.exists(candidate)? {
                    return Ok(candidate.clone());
                }
            }
        }
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| FsError::invalid_path(logical))
    }

    /// Whether `physical`, resolved from primary path `primary`, may be
    /// deleted.
    fn may_delete(&self, _physical: &str, _primary: &str) -> bool {
        true
    }
}

/// Logical paths are physical paths.
#[derive(Debug, Default, Clone)]
pub struct IdentityResolver;

impl PhysicalPathResolver for IdentityResolver {
    fn candidates(&self, logical: &str) -> FsResult<Vec<String>> {
        Ok(vec![logical.to_string()])
    }
}

/// A primary (local, writable) root backed by a secondary root that is
/// consulted when the primary lacks a path.
#[derive(Debug, Clone)]
pub struct DualRootResolver {
    primary_root: String,
    secondary_root: String,
    secondary_read_only: bool,
}

impl DualRootResolver {
    pub fn new(primary_root: &str, secondary_root: &str, secondary_read_only: bool) -> FsResult<Self> {
        let primary_root = path::normalize(primary_root)?;
        let secondary_root = path::normalize(secondary_root)?;
        if path::is_under(&secondary_root, &primary_root) || path::is_under(&primary_root, &secondary_root) {
            return Err(FsError::invalid_path(format!(
                "roots {primary_root} and {secondary_root} overlap"
            )));
        }
        Ok(Self {
            primary_root,
            secondary_root,
            secondary_read_only,
        })
    }

    pub fn primary_root(&self) -> &str {
        &self.primary_root
    }

    pub fn secondary_root(&self) -> &str {
        &self.secondary_root
    }

    pub fn secondary_read_only(&self) -> bool {
        self.secondary_read_only
    }
}

impl PhysicalPathResolver for DualRootResolver {
    fn candidates(&self, logical: &str) -> FsResult<Vec<String>> {
        match path::relative(logical, &self.primary_root) {
            Some(rel) => Ok(vec![
                logical.to_string(),
                path::join(&self.secondary_root, rel)?,
            ]),
            None => Ok(vec![logical.to_string()]),
        }
    }

    /// A secondary copy is deleted only when the secondary root is
    /// writable, or when the copy is itself the primary path.
    fn may_delete(&self, physical: &str, primary: &str) -> bool {
        if !path::is_under(physical, &self.secondary_root) {
            return true;
        }
        !self.secondary_read_only || physical == primary
    }
}

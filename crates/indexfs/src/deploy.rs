//! Manifest of the files in a deployed index version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::directory::Directory;
use crate::error::{FsError, FsResult};
use crate::types::WriterOption;

pub const DEPLOY_FILE_LIST_NAME: &str = "deploy_meta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployFileMeta {
    pub path: String,
    pub length: u64,
    pub modify_time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployFileList {
    pub files: Vec<DeployFileMeta>,
}

impl DeployFileList {
    /// Every file under `dir`, with paths relative to it.
    pub fn from_directory(dir: &Directory) -> FsResult<Self> {
        let mut files = Vec::new();
        for rel in dir.list_file("", true)? {
            let meta = dir.file_meta(&rel)?;
            if meta.is_dir {
                continue;
            }
            files.push(DeployFileMeta {
                path: rel,
                length: meta.length,
                modify_time: meta.modify_time,
            });
        }
        Ok(Self { files })
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// Files that must be transferred on top of `previous`: new ones and
    /// ones whose length changed.
    pub fn diff(&self, previous: &DeployFileList) -> Vec<&DeployFileMeta> {
        let old: BTreeMap<&str, u64> = previous
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.length))
            .collect();
        self.files
            .iter()
            .filter(|f| old.get(f.path.as_str()) != Some(&f.length))
            .collect()
    }

    pub fn to_json(&self) -> FsResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FsError::other(format!("failed to encode deploy file list: {e}")))
    }

    pub fn from_json(json: &str) -> FsResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| FsError::corruption(format!("deploy file list is broken: {e}")))
    }

    /// Write the list into `dir`, replacing any previous one.
    pub fn store(&self, dir: &Directory) -> FsResult<()> {
        dir.write_file(
            DEPLOY_FILE_LIST_NAME,
            self.to_json()?.as_bytes(),
            &WriterOption::overwrite(),
        )
    }

    pub fn load(dir: &Directory) -> FsResult<Self> {
        let bytes = dir.read_all(DEPLOY_FILE_LIST_NAME)?;
        let json = std::str::from_utf8(&bytes)
            .map_err(|e| FsError::corruption(format!("deploy file list is not utf-8: {e}")))?;
        Self::from_json(json)
    }
}

//! File writers.

use std::fmt;
use std::sync::Arc;

use crate::error::FsResult;
use crate::options::RaidConfig;
use crate::raw::{RawFs, RawWriter};

/// Sequential writer for one new file.
///
/// Nothing is visible to readers until [`close`](FileWriter::close)
/// returns.
pub trait FileWriter: Send + fmt::Debug {
    /// Logical path being written.
    fn path(&self) -> &str;

    /// Append bytes.
    fn write(&mut self, data: &[u8]) -> FsResult<()>;

    /// Bytes written so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish the file.
    fn close(self: Box<Self>) -> FsResult<()>;
}

pub(crate) type PublishBuffer = Box<dyn FnOnce(String, Vec<u8>) -> FsResult<()> + Send>;
pub(crate) type PublishLength = Box<dyn FnOnce(&str, u64) -> FsResult<()> + Send>;

/// Buffers the whole file in memory and hands it to the owning storage on
/// close.
pub struct InMemFileWriter {
    path: String,
    buffer: Vec<u8>,
    publish: PublishBuffer,
}

impl InMemFileWriter {
    pub(crate) fn new(path: impl Into<String>, capacity: usize, publish: PublishBuffer) -> Self {
        Self {
            path: path.into(),
            buffer: Vec::with_capacity(capacity),
            publish,
        }
    }
}

impl fmt::Debug for InMemFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemFileWriter")
            .field("path", &self.path)
            .field("len", &self.buffer.len())
            .finish()
    }
}

impl FileWriter for InMemFileWriter {
    fn path(&self) -> &str {
        &self.path
    }

    fn write(&mut self, data: &[u8]) -> FsResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn close(self: Box<Self>) -> FsResult<()> {
        let this = *self;
        (this.publish)(this.path, this.buffer)
    }
}

/// Streams to a temporary physical file and renames it into place on
/// close, so a crash never leaves a half-written file at the final path.
pub struct DiskFileWriter {
    path: String,
    physical_path: String,
    temp_path: String,
    raw: Arc<dyn RawFs>,
    writer: Box<dyn RawWriter>,
    publish: PublishLength,
}

impl DiskFileWriter {
    pub(crate) fn create(
        raw: Arc<dyn RawFs>,
        path: impl Into<String>,
        physical_path: impl Into<String>,
        raid: Option<&RaidConfig>,
        publish: PublishLength,
    ) -> FsResult<Self> {
        let physical_path = physical_path.into();
        let temp_path = temp_path_for(&physical_path);
        let writer = raw.open_write(&temp_path, raid)?;
        Ok(Self {
            path: path.into(),
            physical_path,
            temp_path,
            raw,
            writer,
            publish,
        })
    }
}

/// Unique sibling path used while a file is being written.
pub(crate) fn temp_path_for(physical_path: &str) -> String {
    format!("{physical_path}.__tmp__{}", uuid::Uuid::new_v4().simple())
}

impl fmt::Debug for DiskFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskFileWriter")
            .field("path", &self.path)
            .field("physical_path", &self.physical_path)
            .field("len", &self.writer.len())
            .finish()
    }
}

impl FileWriter for DiskFileWriter {
    fn path(&self) -> &str {
        &self.path
    }

    fn write(&mut self, data: &[u8]) -> FsResult<()> {
        self.writer.append(data)
    }

    fn len(&self) -> u64 {
        self.writer.len()
    }

    fn close(self: Box<Self>) -> FsResult<()> {
        let this = *self;
        let len = this.writer.len();
        let result = this
            .writer
            .close()
            .and_then(|()| this.raw.rename(&this.temp_path, &this.physical_path));
        if let Err(e) = result {
            tracing::error!(path = %this.path, error = %e, "failed to publish file");
            if let Err(cleanup) = this.raw.delete(&this.temp_path, true) {
                tracing::warn!(path = %this.temp_path, error = %cleanup, "failed to remove temp file");
            }
            return Err(e);
        }
        (this.publish)(&this.path, len)
    }
}

//! File-system error types.

use std::io;
use thiserror::Error;

/// File-system error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path, package or file does not exist where required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Something already exists in a conflicting way.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// On-disk structure failed a size or shape check.
    ///
    /// Never recoverable: the affected file must be treated as unusable.
    #[error("index collapsed: {0}")]
    Corruption(String),

    /// Removal refused because the node is referenced elsewhere.
    ///
    /// Retry after a quiescence point (e.g. after a synchronous flush).
    #[error("busy: {0}")]
    Busy(String),

    /// Operation not supported by this storage or directory.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Read beyond a known file or block boundary.
    #[error("out of range: {path} [offset {offset}, len {len}) exceeds length {file_len}")]
    OutOfRange {
        path: String,
        offset: u64,
        len: u64,
        file_len: u64,
    },

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a Corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create a Busy error.
    pub fn busy(path: impl Into<String>) -> Self {
        Self::Busy(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an OutOfRange error.
    pub fn out_of_range(path: impl Into<String>, offset: u64, len: u64, file_len: u64) -> Self {
        Self::OutOfRange {
            path: path.into(),
            offset,
            len,
            file_len,
        }
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Wrap an I/O error with the path it happened on.
    ///
    /// `NotFound` keeps its kind so callers can still tell "absent" apart
    /// from other failures.
    pub fn io_at(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_string()),
            kind => Self::Io(io::Error::new(kind, format!("{path}: {err}"))),
        }
    }

    /// Returns true for the "does not exist" condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns true when the failure is a reference-count conflict.
    pub fn is_busy(&self) -> bool {
        matches!(self, FsError::Busy(_))
    }

    /// Returns true for structural corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, FsError::Corruption(_))
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::Corruption(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            FsError::Busy(msg) => io::Error::new(io::ErrorKind::ResourceBusy, msg),
            FsError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            e @ FsError::OutOfRange { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string())
            }
            FsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::Io(e) => e,
            FsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// File-system result type.
pub type FsResult<T> = Result<T, FsError>;

use indexfs::FsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    /// The file failed a header or size check.
    #[error("hash table corrupted: {0}")]
    Corruption(String),

    /// A build table has no room left; stretch it and retry.
    #[error("hash table full: {0}")]
    TableFull(String),

    /// Invalid key or table parameter.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl TableError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        TableError::Corruption(msg.into())
    }

    pub fn table_full(msg: impl Into<String>) -> Self {
        TableError::TableFull(msg.into())
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        TableError::InvalidKey(msg.into())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, TableError::Corruption(_) | TableError::Fs(FsError::Corruption(_)))
    }

    pub fn is_table_full(&self) -> bool {
        matches!(self, TableError::TableFull(_))
    }
}

pub type TableResult<T> = Result<T, TableError>;

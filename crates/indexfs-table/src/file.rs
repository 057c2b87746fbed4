//! Byte access to an opened table file.

use std::borrow::Cow;

use indexfs::{FileReader, FsError, ReadOption};

use crate::error::{TableError, TableResult};

/// Reads fixed ranges of a table file.
///
/// Resident files are sliced directly. Cache-backed files fetch the one
/// cache block covering a range when it does not straddle two blocks.
/// Everything else is a positional read.
#[derive(Debug, Clone)]
pub struct TableFile {
    reader: FileReader,
}

impl TableFile {
    pub fn new(reader: FileReader) -> Self {
        Self { reader }
    }

    pub fn len(&self) -> u64 {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &str {
        self.reader.path()
    }

    pub fn reader(&self) -> &FileReader {
        &self.reader
    }

    fn check_range(&self, offset: u64, len: usize) -> TableResult<()> {
        if offset + len as u64 > self.len() {
            return Err(FsError::out_of_range(self.path(), offset, len as u64, self.len()).into());
        }
        Ok(())
    }

    pub fn read_at(&self, offset: u64, len: usize) -> TableResult<Cow<'_, [u8]>> {
        self.check_range(offset, len)?;
        if let Some(data) = self.reader.as_slice() {
            let start = offset as usize;
            return Ok(Cow::Borrowed(&data[start..start + len]));
        }
        let option = ReadOption::default();
        if let Some(accessor) = self.reader.block_accessor() {
            if accessor.get_block_count(offset, len as u64) == 1 {
                let block = accessor.get_block(offset, &option)?;
                let start = accessor.get_in_block_offset(offset);
                return Ok(Cow::Owned(block.data()[start..start + len].to_vec()));
            }
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact_at(&mut buf, offset, &option)?;
        Ok(Cow::Owned(buf))
    }

    pub async fn read_at_async(&self, offset: u64, len: usize) -> TableResult<Vec<u8>> {
        self.check_range(offset, len)?;
        if let Some(data) = self.reader.as_slice() {
            let start = offset as usize;
            return Ok(data[start..start + len].to_vec());
        }
        let buf = self.reader.read_async(offset, len, ReadOption::default()).await?;
        if buf.len() != len {
            return Err(TableError::corruption(format!(
                "short read of {} at {offset}: {} of {len} bytes",
                self.path(),
                buf.len()
            )));
        }
        Ok(buf)
    }
}

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::address_mapper::CompressFileAddressMapper;
use super::codec::{DEFAULT_ZSTD_LEVEL, compress_block, decompress_block};
use crate::directory::Directory;
use crate::error::{FsError, FsResult};
use crate::file::{FileReader, FileWriter};
use crate::types::{FsOpenType, ReadOption, WriterOption};

pub const COMPRESS_INFO_SUFFIX: &str = ".compress_info";
pub const ADDRESS_MAPPER_SUFFIX: &str = ".address_mapper";

/// Sidecar describing a compressed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressInfo {
    pub compressor: String,
    pub block_size: u64,
    pub block_count: u64,
    pub uncompressed_length: u64,
    /// Bytes of compressed blocks; the address table follows them.
    pub compressed_length: u64,
}

impl CompressInfo {
    /// Check the fields agree with each other before trusting them for
    /// offsets.
    fn validate(&self, name: &str) -> FsResult<()> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(FsError::corruption(format!(
                "compress info of {name} has block size {}",
                self.block_size
            )));
        }
        let blocks = self.uncompressed_length.div_ceil(self.block_size);
        if self.block_count != blocks {
            return Err(FsError::corruption(format!(
                "compress info of {name} records {} blocks for {} bytes of {}-byte blocks",
                self.block_count, self.uncompressed_length, self.block_size
            )));
        }
        // A block costs at least its codec byte.
        if self.compressed_length < self.block_count {
            return Err(FsError::corruption(format!(
                "compress info of {name} records {} compressed bytes for {} blocks",
                self.compressed_length, self.block_count
            )));
        }
        Ok(())
    }
}

/// Writes `[blocks][address table]` plus the `.compress_info` sidecar.
///
/// Each block is stored as a codec byte followed by its payload.
#[derive(Debug)]
pub struct CompressFileWriter {
    dir: Directory,
    name: String,
    option: WriterOption,
    writer: Box<dyn FileWriter>,
    mapper: CompressFileAddressMapper,
    buffer: Vec<u8>,
    zstd_level: i32,
    uncompressed_len: u64,
}

impl CompressFileWriter {
    pub fn create(dir: &Directory, name: &str, block_size: u64, option: &WriterOption) -> FsResult<Self> {
        let mapper = CompressFileAddressMapper::new(block_size)?;
        let writer = dir.create_file_writer(name, option)?;
        Ok(Self {
            dir: dir.clone(),
            name: name.to_string(),
            option: option.clone(),
            writer,
            mapper,
            buffer: Vec::with_capacity(block_size as usize),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            uncompressed_len: 0,
        })
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Uncompressed bytes written so far.
    pub fn len(&self) -> u64 {
        self.uncompressed_len
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_len == 0
    }

    pub fn write(&mut self, mut data: &[u8]) -> FsResult<()> {
        let block_size = self.mapper.block_size() as usize;
        while !data.is_empty() {
            let n = (block_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            self.uncompressed_len += n as u64;
            data = &data[n..];
            if self.buffer.len() == block_size {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    fn flush_block(&mut self) -> FsResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let (codec, payload) = compress_block(&self.buffer, self.zstd_level)?;
        self.writer.write(&[codec])?;
        self.writer.write(&payload)?;
        self.mapper.add_one_block(payload.len() as u64 + 1);
        self.buffer.clear();
        Ok(())
    }

    pub fn close(mut self) -> FsResult<CompressInfo> {
        self.flush_block()?;
        self.writer.write(&self.mapper.dump())?;
        self.writer.close()?;

        let info = CompressInfo {
            compressor: "zstd".to_string(),
            block_size: self.mapper.block_size(),
            block_count: self.mapper.block_count() as u64,
            uncompressed_length: self.uncompressed_len,
            compressed_length: self.mapper.compress_file_length(),
        };
        let json = serde_json::to_vec_pretty(&info)
            .map_err(|e| FsError::other(format!("failed to encode compress info: {e}")))?;
        self.dir
            .write_file(&format!("{}{COMPRESS_INFO_SUFFIX}", self.name), &json, &self.option)?;
        tracing::debug!(
            file = %self.name,
            blocks = info.block_count,
            raw = info.uncompressed_length,
            compressed = info.compressed_length,
            "closed compressed file"
        );
        Ok(info)
    }
}

/// Random-access reads over a file written by [`CompressFileWriter`].
///
/// The most recently decoded block is kept for the next read.
#[derive(Debug)]
pub struct CompressFileReader {
    reader: FileReader,
    info: CompressInfo,
    mapper: CompressFileAddressMapper,
    current: Mutex<Option<(usize, Arc<Vec<u8>>)>>,
}

impl CompressFileReader {
    /// Open `name` in `dir`.
    ///
    /// A resident file yields its address table from its own tail. Otherwise
    /// the table is read once and kept in the `.address_mapper` slice file
    /// for later opens.
    pub fn open(dir: &Directory, name: &str, open_type: FsOpenType) -> FsResult<Self> {
        let info_bytes = dir.read_all(&format!("{name}{COMPRESS_INFO_SUFFIX}"))?;
        let info: CompressInfo = serde_json::from_slice(&info_bytes)
            .map_err(|e| FsError::corruption(format!("compress info of {name} is broken: {e}")))?;
        info.validate(name)?;
        let reader = dir.create_file_reader(name, open_type)?;

        let (table_len, expected) = info
            .block_count
            .checked_add(1)
            .and_then(|n| n.checked_mul(size_of::<u64>() as u64))
            .and_then(|table_len| Some((table_len, info.compressed_length.checked_add(table_len)?)))
            .ok_or_else(|| FsError::corruption(format!("compress info of {name} overflows")))?;
        if reader.len() != expected {
            return Err(FsError::corruption(format!(
                "compressed file {name} is {} bytes, info records {} + {table_len}",
                reader.len(),
                info.compressed_length
            )));
        }
        let mapper = match reader.as_slice() {
            Some(bytes) => CompressFileAddressMapper::load(
                &bytes[info.compressed_length as usize..],
                info.block_count as usize,
                info.block_size,
            )?,
            None => Self::load_cached_mapper(dir, name, &reader, &info)?,
        };
        if mapper.compress_file_length() != info.compressed_length {
            return Err(FsError::corruption(format!(
                "address table of {name} ends at {}, info records {}",
                mapper.compress_file_length(),
                info.compressed_length
            )));
        }
        Ok(Self {
            reader,
            info,
            mapper,
            current: Mutex::new(None),
        })
    }

    fn load_cached_mapper(
        dir: &Directory,
        name: &str,
        reader: &FileReader,
        info: &CompressInfo,
    ) -> FsResult<CompressFileAddressMapper> {
        let block_count = info.block_count as usize;
        let table_len = CompressFileAddressMapper::table_len(block_count);
        let cache_name = format!("{name}{ADDRESS_MAPPER_SUFFIX}");
        match dir.create_file_reader(&cache_name, FsOpenType::Slice) {
            Ok(cached) if cached.len() == table_len as u64 => {
                return CompressFileAddressMapper::load(&cached.read_all()?, block_count, info.block_size);
            }
            Ok(cached) => {
                tracing::warn!(file = name, len = cached.len(), "ignoring stale address mapper cache");
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut table = vec![0u8; table_len];
        reader.read_exact_at(&mut table, info.compressed_length, &ReadOption::default())?;
        let mapper = CompressFileAddressMapper::load(&table, block_count, info.block_size)?;
        match dir.create_slice_file(&cache_name, table_len, 1) {
            Ok(slice) => slice.append(&table)?,
            Err(e) => tracing::debug!(file = name, error = %e, "address mapper not cached"),
        }
        Ok(mapper)
    }

    pub fn info(&self) -> &CompressInfo {
        &self.info
    }

    pub fn mapper(&self) -> &CompressFileAddressMapper {
        &self.mapper
    }

    /// Uncompressed length.
    pub fn len(&self) -> u64 {
        self.info.uncompressed_length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn block(&self, idx: usize) -> FsResult<Arc<Vec<u8>>> {
        if let Some((current, data)) = &*self.current.lock() {
            if *current == idx {
                return Ok(Arc::clone(data));
            }
        }
        let (address, stored) = self
            .mapper
            .compress_block_address(idx)
            .zip(self.mapper.compress_block_length(idx))
            .ok_or_else(|| FsError::corruption(format!("compressed block {idx} is past the address table")))?;
        if stored == 0 {
            return Err(FsError::corruption(format!("compressed block {idx} is empty")));
        }
        let mut raw = vec![0u8; stored as usize];
        self.reader.read_exact_at(&mut raw, address, &ReadOption::default())?;
        let block_start = idx as u64 * self.info.block_size;
        let expected = self.info.block_size.min(self.len() - block_start) as usize;
        let data = Arc::new(decompress_block(raw[0], &raw[1..], expected)?);
        *self.current.lock() = Some((idx, Arc::clone(&data)));
        Ok(data)
    }

    /// Read uncompressed bytes at `offset`. Short at end of file.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        if offset >= self.len() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.len() - offset) as usize;
        let mut done = 0;
        while done < want {
            let pos = offset + done as u64;
            let block = self.block(self.mapper.offset_to_block_idx(pos))?;
            let in_block = self.mapper.offset_to_in_block_offset(pos) as usize;
            let n = (block.len() - in_block).min(want - done);
            buf[done..done + n].copy_from_slice(&block[in_block..in_block + n]);
            done += n;
        }
        Ok(done)
    }

    pub fn read_all(&self) -> FsResult<Vec<u8>> {
        let mut out = vec![0u8; self.len() as usize];
        self.read(&mut out, 0)?;
        Ok(out)
    }
}

//! Chunked record streams.
//!
//! Records are appended into fixed-size chunks, and each chunk is compressed
//! on its own. A record is addressed by the file offset of its first chunk
//! and its offset inside that chunk's decoded bytes; long records continue
//! into the following chunks.
//!
//! Chunk layout: `[stored_len u32][raw_len u32][codec u8][payload]`, little
//! endian.

use byteorder::{ByteOrder, LittleEndian};

use super::codec::{DEFAULT_ZSTD_LEVEL, compress_block, decompress_block};
use crate::error::{FsError, FsResult};
use crate::file::{FileReader, FileWriter};
use crate::types::ReadOption;

pub const CHUNK_HEADER_LEN: u64 = 9;
/// Largest decoded chunk accepted on either side.
pub const MAX_CHUNK_LEN: usize = 64 << 20;

#[derive(Debug)]
pub struct ChunkFileEncoder {
    writer: Box<dyn FileWriter>,
    chunk_size: usize,
    zstd_level: i32,
    buffer: Vec<u8>,
    /// File offset of the chunk being filled.
    offset: u64,
}

impl ChunkFileEncoder {
    pub fn new(writer: Box<dyn FileWriter>, chunk_size: usize) -> FsResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_LEN {
            return Err(FsError::invalid_argument(format!("invalid chunk size {chunk_size}")));
        }
        Ok(Self {
            offset: writer.len(),
            writer,
            chunk_size,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            buffer: Vec::with_capacity(chunk_size),
        })
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Append a record, returning `(chunk_offset, in_chunk_offset)`.
    pub fn append(&mut self, record: &[u8]) -> FsResult<(u64, u64)> {
        if self.buffer.len() == self.chunk_size {
            self.flush_chunk()?;
        }
        let position = (self.offset, self.buffer.len() as u64);
        let mut rest = record;
        loop {
            let n = (self.chunk_size - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if rest.is_empty() {
                break;
            }
            self.flush_chunk()?;
        }
        Ok(position)
    }

    fn flush_chunk(&mut self) -> FsResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let (codec, payload) = compress_block(&self.buffer, self.zstd_level)?;
        let mut header = [0u8; CHUNK_HEADER_LEN as usize];
        LittleEndian::write_u32(&mut header[0..4], payload.len() as u32);
        LittleEndian::write_u32(&mut header[4..8], self.buffer.len() as u32);
        header[8] = codec;
        self.writer.write(&header)?;
        self.writer.write(&payload)?;
        self.offset += CHUNK_HEADER_LEN + payload.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flush the last chunk and publish the file. Returns its length.
    pub fn close(mut self) -> FsResult<u64> {
        self.flush_chunk()?;
        let len = self.writer.len();
        self.writer.close()?;
        Ok(len)
    }
}

/// Reads records back out of a chunk file, keeping the last decoded chunk.
#[derive(Debug)]
pub struct ChunkFileDecoder {
    reader: FileReader,
    current: Option<u64>,
    next_offset: u64,
    chunk: Vec<u8>,
}

impl ChunkFileDecoder {
    pub fn new(reader: FileReader) -> Self {
        Self {
            reader,
            current: None,
            next_offset: 0,
            chunk: Vec::new(),
        }
    }

    fn load_chunk(&mut self, chunk_offset: u64) -> FsResult<()> {
        if self.current == Some(chunk_offset) {
            return Ok(());
        }
        let file_len = self.reader.len();
        let payload_offset = chunk_offset
            .checked_add(CHUNK_HEADER_LEN)
            .filter(|&end| end <= file_len);
        let Some(payload_offset) = payload_offset else {
            return Err(FsError::out_of_range(
                self.reader.path(),
                chunk_offset,
                CHUNK_HEADER_LEN,
                file_len,
            ));
        };
        let option = ReadOption::default();
        let mut header = [0u8; CHUNK_HEADER_LEN as usize];
        self.reader.read_exact_at(&mut header, chunk_offset, &option)?;
        let stored = LittleEndian::read_u32(&header[0..4]) as usize;
        let raw_len = LittleEndian::read_u32(&header[4..8]) as usize;
        if stored as u64 > file_len - payload_offset {
            return Err(FsError::corruption(format!("chunk at {chunk_offset} is truncated")));
        }
        if raw_len > MAX_CHUNK_LEN {
            return Err(FsError::corruption(format!(
                "chunk at {chunk_offset} decodes to {raw_len} bytes"
            )));
        }

        let mut payload = vec![0u8; stored];
        self.reader.read_exact_at(&mut payload, payload_offset, &option)?;
        let chunk = decompress_block(header[8], &payload, raw_len)?;
        if chunk.is_empty() {
            return Err(FsError::corruption(format!("chunk at {chunk_offset} is empty")));
        }
        self.chunk = chunk;
        self.current = Some(chunk_offset);
        self.next_offset = payload_offset + stored as u64;
        Ok(())
    }

    /// Bytes inside a single chunk. Fails with `OutOfRange` when the range
    /// crosses the chunk end.
    pub fn read(&mut self, chunk_offset: u64, in_chunk_offset: u64, len: usize) -> FsResult<&[u8]> {
        self.load_chunk(chunk_offset)?;
        let range = usize::try_from(in_chunk_offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= self.chunk.len());
        match range {
            Some(range) => Ok(&self.chunk[range]),
            None => Err(FsError::out_of_range(
                self.reader.path(),
                in_chunk_offset,
                len as u64,
                self.chunk.len() as u64,
            )),
        }
    }

    /// A whole record, following it into later chunks as needed.
    pub fn read_record(&mut self, chunk_offset: u64, in_chunk_offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut offset = chunk_offset;
        let mut start = usize::try_from(in_chunk_offset).unwrap_or(usize::MAX);
        while out.len() < len {
            self.load_chunk(offset)?;
            if start > self.chunk.len() {
                return Err(FsError::out_of_range(
                    self.reader.path(),
                    start as u64,
                    (len - out.len()) as u64,
                    self.chunk.len() as u64,
                ));
            }
            let n = (self.chunk.len() - start).min(len - out.len());
            out.extend_from_slice(&self.chunk[start..start + n]);
            offset = self.next_offset;
            start = 0;
        }
        Ok(out)
    }
}

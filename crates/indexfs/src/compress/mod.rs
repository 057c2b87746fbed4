//! Block-compressed files and chunked record streams.

mod address_mapper;
mod chunk;
mod codec;
mod compress_file;

pub use address_mapper::CompressFileAddressMapper;
pub use chunk::{CHUNK_HEADER_LEN, ChunkFileDecoder, ChunkFileEncoder};
pub use codec::{CODEC_RAW, CODEC_ZSTD, DEFAULT_ZSTD_LEVEL, compress_block, decompress_block};
pub use compress_file::{
    ADDRESS_MAPPER_SUFFIX, COMPRESS_INFO_SUFFIX, CompressFileReader, CompressFileWriter, CompressInfo,
};

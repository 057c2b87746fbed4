use crate::error::{FsError, FsResult};

pub const CODEC_RAW: u8 = 0;
pub const CODEC_ZSTD: u8 = 1;

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compress `data`, keeping it raw when zstd does not make it smaller.
pub fn compress_block(data: &[u8], zstd_level: i32) -> FsResult<(u8, Vec<u8>)> {
    if data.len() > u32::MAX as usize {
        return Err(FsError::invalid_argument(format!(
            "block too large for u32 length: {}",
            data.len()
        )));
    }
    let compressed = zstd::bulk::compress(data, zstd_level)?;
    if compressed.len() < data.len() {
        Ok((CODEC_ZSTD, compressed))
    } else {
        Ok((CODEC_RAW, data.to_vec()))
    }
}

pub fn decompress_block(codec: u8, payload: &[u8], expected_len: usize) -> FsResult<Vec<u8>> {
    let out = match codec {
        CODEC_RAW => payload.to_vec(),
        CODEC_ZSTD => zstd::bulk::decompress(payload, expected_len)
            .map_err(|e| FsError::corruption(format!("failed to decompress zstd block: {e}")))?,
        _ => return Err(FsError::corruption(format!("unsupported block codec {codec}"))),
    };
    if out.len() != expected_len {
        return Err(FsError::corruption(format!(
            "block length mismatch after decode: expected {expected_len}, got {}",
            out.len()
        )));
    }
    Ok(out)
}

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FsError, FsResult};

const ADDR_SIZE: usize = std::mem::size_of::<u64>();

/// Maps uncompressed offsets onto compressed blocks.
///
/// Holds `block_count + 1` cumulative offsets: entry `i` is where block `i`
/// starts in the compressed stream, the last entry is the total compressed
/// length. Serialized as little-endian `u64`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressFileAddressMapper {
    block_size: u64,
    power: u32,
    base_addrs: Vec<u64>,
}

impl CompressFileAddressMapper {
    pub fn new(block_size: u64) -> FsResult<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(FsError::corruption(format!(
                "compress block size {block_size} is not a power of two"
            )));
        }
        Ok(Self {
            block_size,
            power: block_size.trailing_zeros(),
            base_addrs: vec![0],
        })
    }

    /// Rebuild from a serialized offset table of `block_count` blocks.
    pub fn load(table: &[u8], block_count: usize, block_size: u64) -> FsResult<Self> {
        let mut mapper = Self::new(block_size)?;
        let expected = Self::table_len(block_count);
        if table.len() != expected {
            return Err(FsError::corruption(format!(
                "address table is {} bytes, expected {expected} for {block_count} blocks",
                table.len()
            )));
        }
        let mut addrs = vec![0u64; block_count + 1];
        LittleEndian::read_u64_into(table, &mut addrs);
        if addrs[0] != 0 || addrs.windows(2).any(|w| w[1] < w[0]) {
            return Err(FsError::corruption("address table is not monotonic from zero"));
        }
        mapper.base_addrs = addrs;
        Ok(mapper)
    }

    /// Serialized size of a table for `block_count` blocks.
    pub fn table_len(block_count: usize) -> usize {
        (block_count + 1) * ADDR_SIZE
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.base_addrs.len() - 1
    }

    pub fn offset_to_block_idx(&self, offset: u64) -> usize {
        (offset >> self.power) as usize
    }

    pub fn offset_to_in_block_offset(&self, offset: u64) -> u64 {
        offset & (self.block_size - 1)
    }

    /// Record the next compressed block.
    pub fn add_one_block(&mut self, compressed_len: u64) {
        let last = self.compress_file_length();
        self.base_addrs.push(last + compressed_len);
    }

    /// Start of block `idx` in the compressed stream, `None` past the last
    /// block.
    pub fn compress_block_address(&self, idx: usize) -> Option<u64> {
        if idx >= self.block_count() {
            return None;
        }
        self.base_addrs.get(idx).copied()
    }

    pub fn compress_block_length(&self, idx: usize) -> Option<u64> {
        let start = self.compress_block_address(idx)?;
        let end = self.base_addrs.get(idx.checked_add(1)?)?;
        end.checked_sub(start)
    }

    /// Total compressed bytes, excluding the table itself.
    pub fn compress_file_length(&self) -> u64 {
        self.base_addrs.last().copied().unwrap_or(0)
    }

    pub fn dump(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.base_addrs.len() * ADDR_SIZE];
        LittleEndian::write_u64_into(&self.base_addrs, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_must_be_power_of_two() {
        assert!(CompressFileAddressMapper::new(3000).unwrap_err().is_corruption());
        assert!(CompressFileAddressMapper::new(0).unwrap_err().is_corruption());
        let mapper = CompressFileAddressMapper::new(4096).unwrap();
        assert_eq!(mapper.offset_to_block_idx(8191), 1);
        assert_eq!(mapper.offset_to_in_block_offset(8193), 1);
    }

    #[test]
    fn test_dump_and_load_reproduce_blocks() {
        let lengths = [120u64, 4096, 7, 900];
        let mut mapper = CompressFileAddressMapper::new(4096).unwrap();
        for len in lengths {
            mapper.add_one_block(len);
        }

        let table = mapper.dump();
        assert_eq!(table.len(), CompressFileAddressMapper::table_len(lengths.len()));
        let loaded = CompressFileAddressMapper::load(&table, lengths.len(), 4096).unwrap();
        assert_eq!(loaded, mapper);

        let mut expected_addr = 0;
        for (i, len) in lengths.iter().enumerate() {
            assert_eq!(loaded.compress_block_address(i), Some(expected_addr));
            assert_eq!(loaded.compress_block_length(i), Some(*len));
            expected_addr += len;
        }
        assert_eq!(loaded.compress_file_length(), lengths.iter().sum::<u64>());
        assert_eq!(loaded.compress_block_address(lengths.len()), None);
        assert_eq!(loaded.compress_block_length(lengths.len()), None);
        assert_eq!(loaded.compress_block_length(usize::MAX), None);
    }

    #[test]
    fn test_load_rejects_bad_tables() {
        let mut mapper = CompressFileAddressMapper::new(1024).unwrap();
        mapper.add_one_block(10);
        let table = mapper.dump();
        assert!(CompressFileAddressMapper::load(&table[..8], 1, 1024)
            .unwrap_err()
            .is_corruption());

        let mut broken = table.clone();
        LittleEndian::write_u64(&mut broken[8..], 0);
        broken[..8].copy_from_slice(&5u64.to_le_bytes());
        assert!(CompressFileAddressMapper::load(&broken, 1, 1024)
            .unwrap_err()
            .is_corruption());
    }
}

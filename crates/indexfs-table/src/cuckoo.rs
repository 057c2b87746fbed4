//! Cuckoo table over blocks of [`BLOCK_SIZE`] buckets.
//!
//! Each hash function picks a block; a key lives in any slot of one of its
//! candidate blocks, so a lookup touches at most
//! `num_hash_func * BLOCK_SIZE` buckets.
//!
//! File: `[bucket_count u64][key_count u64][num_hash_func u8][buckets][special buckets]`.

use byteorder::{ByteOrder, LittleEndian};

use indexfs::{Directory, FsOpenType};

use crate::bucket::{
    FindResult, IterateOrder, SpecialKeys, TableEntry, TableType, TableValue, bucket_len, decode_bucket,
    encode_bucket, hash_key, is_special_key,
};
use crate::error::{TableError, TableResult};
use crate::file::TableFile;
use crate::table::{BuildTable, PrefixKeyTable};

pub const CUCKOO_HEADER_LEN: usize = 17;
pub const BLOCK_SIZE: u64 = 4;
pub const DEFAULT_NUM_HASH_FUNC: u8 = 2;
const MAX_NUM_HASH_FUNC: u8 = 8;
const MAX_KICKS: usize = 256;

fn block_of(key: u64, func: u8, block_count: u64) -> u64 {
    hash_key(key, func as u64) % block_count
}

fn bucket_offset<V: TableValue>(bucket_id: u64) -> u64 {
    CUCKOO_HEADER_LEN as u64 + bucket_id * bucket_len::<V>() as u64
}

#[derive(Debug, Clone)]
pub struct CuckooHashTable<V: TableValue> {
    buckets: Vec<Option<TableEntry<V>>>,
    num_hash_func: u8,
    used: u64,
    specials: SpecialKeys<V>,
}

impl<V: TableValue> CuckooHashTable<V> {
    pub fn new(block_count: u64, num_hash_func: u8) -> TableResult<Self> {
        if block_count == 0 {
            return Err(TableError::invalid_key("cuckoo table needs at least one block"));
        }
        if num_hash_func == 0 || num_hash_func > MAX_NUM_HASH_FUNC {
            return Err(TableError::invalid_key(format!(
                "cuckoo table supports 1..={MAX_NUM_HASH_FUNC} hash functions, got {num_hash_func}"
            )));
        }
        Ok(Self {
            buckets: vec![None; (block_count * BLOCK_SIZE) as usize],
            num_hash_func,
            used: 0,
            specials: SpecialKeys::default(),
        })
    }

    /// Table sized for `keys` keys at a load of at most 80%.
    pub fn with_key_capacity(keys: u64) -> TableResult<Self> {
        Self::new((keys * 5 / 4).div_ceil(BLOCK_SIZE).max(1), DEFAULT_NUM_HASH_FUNC)
    }

    pub fn block_count(&self) -> u64 {
        self.buckets.len() as u64 / BLOCK_SIZE
    }

    pub fn num_hash_func(&self) -> u8 {
        self.num_hash_func
    }

    fn candidate_slots(&self, key: u64) -> impl Iterator<Item = usize> + '_ {
        let block_count = self.block_count();
        (0..self.num_hash_func).flat_map(move |func| {
            let base = block_of(key, func, block_count) * BLOCK_SIZE;
            (base..base + BLOCK_SIZE).map(|id| id as usize)
        })
    }

    fn slot_of(&self, key: u64) -> Option<usize> {
        self.candidate_slots(key)
            .find(|&slot| self.buckets[slot].is_some_and(|e| e.key == key))
    }

    fn empty_slot(&self, key: u64) -> Option<usize> {
        self.candidate_slots(key).find(|&slot| self.buckets[slot].is_none())
    }

    fn put(&mut self, entry: TableEntry<V>) -> TableResult<()> {
        if is_special_key(entry.key) {
            self.specials.set(entry);
            return Ok(());
        }
        if let Some(slot) = self.slot_of(entry.key) {
            self.buckets[slot] = Some(entry);
            return Ok(());
        }
        if let Some(slot) = self.empty_slot(entry.key) {
            self.buckets[slot] = Some(entry);
            self.used += 1;
            return Ok(());
        }

        // Evict along a deterministic walk; undo everything if it fails.
        let block_count = self.block_count();
        let mut undo: Vec<(usize, Option<TableEntry<V>>)> = Vec::new();
        let mut homeless = entry;
        for kick in 0..MAX_KICKS {
            let func = (kick % self.num_hash_func as usize) as u8;
            let in_block = (kick / self.num_hash_func as usize) as u64 % BLOCK_SIZE;
            let slot = (block_of(homeless.key, func, block_count) * BLOCK_SIZE + in_block) as usize;
            let evicted = self.buckets[slot].replace(homeless);
            undo.push((slot, evicted));
            let Some(evicted) = evicted else {
                self.used += 1;
                return Ok(());
            };
            if let Some(free) = self.empty_slot(evicted.key) {
                self.buckets[free] = Some(evicted);
                self.used += 1;
                return Ok(());
            }
            homeless = evicted;
        }
        for (slot, previous) in undo.into_iter().rev() {
            self.buckets[slot] = previous;
        }
        Err(TableError::table_full(format!(
            "cuckoo table of {block_count} blocks after {MAX_KICKS} evictions"
        )))
    }

    fn table_order(&self) -> Vec<TableEntry<V>> {
        self.buckets
            .iter()
            .flatten()
            .copied()
            .chain(self.specials.entries())
            .collect()
    }

    fn rebuilt(&self, mut block_count: u64, entries: &[TableEntry<V>]) -> TableResult<Self> {
        'grow: loop {
            let mut table = Self::new(block_count, self.num_hash_func)?;
            for entry in entries {
                match table.put(*entry) {
                    Ok(()) => {}
                    Err(e) if e.is_table_full() => {
                        block_count *= 2;
                        continue 'grow;
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(table);
        }
    }
}

impl<V: TableValue> PrefixKeyTable<V> for CuckooHashTable<V> {
    fn table_type(&self) -> TableType {
        TableType::Cuckoo
    }

    fn key_count(&self) -> u64 {
        self.used + self.specials.len()
    }

    fn find(&self, key: u64) -> TableResult<FindResult<V>> {
        if is_special_key(key) {
            return Ok(self.specials.find(key));
        }
        Ok(self
            .slot_of(key)
            .and_then(|slot| self.buckets[slot])
            .map_or(FindResult::NotFound, TableEntry::to_find_result))
    }
}

impl<V: TableValue> BuildTable<V> for CuckooHashTable<V> {
    fn insert(&mut self, key: u64, value: V) -> TableResult<()> {
        self.put(TableEntry::live(key, value))
    }

    fn delete(&mut self, key: u64, value: V) -> TableResult<()> {
        self.put(TableEntry::tombstone(key, value))
    }

    fn stretch(&mut self) -> TableResult<()> {
        let grown = self.rebuilt(self.block_count() * 2, &self.table_order())?;
        tracing::debug!(from = self.block_count(), to = grown.block_count(), "stretched cuckoo table");
        *self = grown;
        Ok(())
    }

    fn entries(&self, order: IterateOrder) -> Vec<TableEntry<V>> {
        let mut entries = self.table_order();
        if order == IterateOrder::KeyOrder {
            entries.sort_by_key(|e| e.key);
        }
        entries
    }

    fn encode(&self, order: IterateOrder) -> TableResult<Vec<u8>> {
        if order == IterateOrder::KeyOrder {
            return self
                .rebuilt(self.block_count(), &self.entries(IterateOrder::KeyOrder))?
                .encode(IterateOrder::TableOrder);
        }
        let len = bucket_len::<V>();
        let mut out = vec![0u8; CUCKOO_HEADER_LEN + self.buckets.len() * len];
        LittleEndian::write_u64(&mut out[0..8], self.buckets.len() as u64);
        LittleEndian::write_u64(&mut out[8..16], self.key_count());
        out[16] = self.num_hash_func;
        for (i, slot) in self.buckets.iter().enumerate() {
            let start = CUCKOO_HEADER_LEN + i * len;
            encode_bucket(slot.as_ref(), &mut out[start..start + len]);
        }
        if !self.specials.is_empty() {
            self.specials.encode(&mut out);
        }
        Ok(out)
    }
}

/// Read-only view of a cuckoo table file.
#[derive(Debug)]
pub struct CuckooHashTableFileReader<V: TableValue> {
    file: TableFile,
    block_count: u64,
    key_count: u64,
    num_hash_func: u8,
    specials: SpecialKeys<V>,
}

impl<V: TableValue> CuckooHashTableFileReader<V> {
    pub fn open(file: TableFile) -> TableResult<Self> {
        if file.len() < CUCKOO_HEADER_LEN as u64 {
            return Err(TableError::corruption(format!(
                "cuckoo table {} is {} bytes, shorter than its header",
                file.path(),
                file.len()
            )));
        }
        let header = file.read_at(0, CUCKOO_HEADER_LEN)?;
        let bucket_count = LittleEndian::read_u64(&header[0..8]);
        let key_count = LittleEndian::read_u64(&header[8..16]);
        let num_hash_func = header[16];
        if num_hash_func == 0 || num_hash_func > MAX_NUM_HASH_FUNC {
            return Err(TableError::corruption(format!(
                "cuckoo table {} declares {num_hash_func} hash functions",
                file.path()
            )));
        }

        // The block count comes from the file size; the header must agree.
        let len = bucket_len::<V>() as u64;
        let payload = file.len() - CUCKOO_HEADER_LEN as u64;
        let (bucket_bytes, has_specials) = if payload % len != 0 {
            return Err(TableError::corruption(format!(
                "cuckoo table {} is {} bytes, not a whole number of buckets",
                file.path(),
                file.len()
            )));
        } else if payload / len == bucket_count {
            (payload, false)
        } else if Some(payload / len) == bucket_count.checked_add(2) {
            (payload - 2 * len, true)
        } else {
            return Err(TableError::corruption(format!(
                "cuckoo table {} is {} bytes, expected {} for {bucket_count} buckets",
                file.path(),
                file.len(),
                CUCKOO_HEADER_LEN as u64 + bucket_count.saturating_mul(len)
            )));
        };
        let slots = bucket_bytes / len;
        if slots == 0 || slots % BLOCK_SIZE != 0 {
            return Err(TableError::corruption(format!(
                "cuckoo table {} has {slots} buckets, not whole blocks of {BLOCK_SIZE}",
                file.path()
            )));
        }
        let specials = if has_specials {
            SpecialKeys::decode(&file.read_at(CUCKOO_HEADER_LEN as u64 + bucket_bytes, 2 * len as usize)?)?
        } else {
            SpecialKeys::default()
        };
        tracing::trace!(path = file.path(), block_count = slots / BLOCK_SIZE, key_count, "opened cuckoo table");
        Ok(Self {
            file,
            block_count: slots / BLOCK_SIZE,
            key_count,
            num_hash_func,
            specials,
        })
    }

    pub fn open_in(dir: &Directory, name: &str, open_type: FsOpenType) -> TableResult<Self> {
        Self::open(TableFile::new(dir.create_file_reader(name, open_type)?))
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    fn candidate_buckets(&self, key: u64) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_hash_func).flat_map(move |func| {
            let base = block_of(key, func, self.block_count) * BLOCK_SIZE;
            base..base + BLOCK_SIZE
        })
    }

    pub async fn find_async(&self, key: u64) -> TableResult<FindResult<V>> {
        if is_special_key(key) {
            return Ok(self.specials.find(key));
        }
        let ids: Vec<u64> = self.candidate_buckets(key).collect();
        for id in ids {
            let buf = self.file.read_at_async(bucket_offset::<V>(id), bucket_len::<V>()).await?;
            if let Some(e) = decode_bucket::<V>(&buf)? {
                if e.key == key {
                    return Ok(e.to_find_result());
                }
            }
        }
        Ok(FindResult::NotFound)
    }
}

impl<V: TableValue> PrefixKeyTable<V> for CuckooHashTableFileReader<V> {
    fn table_type(&self) -> TableType {
        TableType::Cuckoo
    }

    fn key_count(&self) -> u64 {
        self.key_count
    }

    fn find(&self, key: u64) -> TableResult<FindResult<V>> {
        if is_special_key(key) {
            return Ok(self.specials.find(key));
        }
        for id in self.candidate_buckets(key) {
            let buf = self.file.read_at(bucket_offset::<V>(id), bucket_len::<V>())?;
            if let Some(e) = decode_bucket::<V>(&buf)? {
                if e.key == key {
                    return Ok(e.to_find_result());
                }
            }
        }
        Ok(FindResult::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_are_validated() {
        assert!(CuckooHashTable::<u64>::new(0, 2).is_err());
        assert!(CuckooHashTable::<u64>::new(4, 0).is_err());
        let table = CuckooHashTable::<u64>::with_key_capacity(100).unwrap();
        assert_eq!(table.num_hash_func(), DEFAULT_NUM_HASH_FUNC);
        assert_eq!(table.block_count(), 32);
    }

    #[test]
    fn test_overfull_insert_is_rolled_back() {
        let mut table = CuckooHashTable::<u64>::new(1, 2).unwrap();
        for key in 0..BLOCK_SIZE {
            table.insert(key, key + 100).unwrap();
        }
        let before = table.entries(IterateOrder::KeyOrder);
        assert!(table.insert(50, 1).unwrap_err().is_table_full());
        assert_eq!(table.entries(IterateOrder::KeyOrder), before);
        assert_eq!(table.find(50).unwrap(), FindResult::NotFound);

        table.insert_or_stretch(50, 1).unwrap();
        assert!(table.block_count() >= 2);
        for key in 0..BLOCK_SIZE {
            assert_eq!(table.find(key).unwrap(), FindResult::Ok(key + 100));
        }
        assert_eq!(table.find(50).unwrap(), FindResult::Ok(1));
    }

    #[test]
    fn test_dense_load_with_evictions() {
        let mut table = CuckooHashTable::<u32>::with_key_capacity(2000).unwrap();
        for key in 0..2000u64 {
            table.insert_or_stretch(key * 7919, key as u32).unwrap();
        }
        assert_eq!(table.key_count(), 2000);
        for key in 0..2000u64 {
            assert_eq!(table.find(key * 7919).unwrap(), FindResult::Ok(key as u32));
        }
    }
}

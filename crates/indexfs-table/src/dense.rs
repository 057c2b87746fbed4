//! Open-addressing table probed from a single hash.
//!
//! File: `[bucket_count u64][key_count u64][buckets][special buckets]`.

use byteorder::{ByteOrder, LittleEndian};

use indexfs::{Directory, FsOpenType};

use crate::bucket::{
    FindResult, IterateOrder, SpecialKeys, TableEntry, TableType, TableValue, bucket_len, decode_bucket,
    encode_bucket, hash_key, is_special_key,
};
use crate::error::{TableError, TableResult};
use crate::file::TableFile;
use crate::table::{BuildTable, PrefixKeyTable};

pub const DENSE_HEADER_LEN: usize = 16;

/// Next bucket after `bucket_id` on the `probe_count`-th probe.
///
/// Power-of-two tables step by triangular numbers; others walk linearly.
/// Both visit every bucket within `bucket_count` probes.
pub fn probe(probe_count: u64, bucket_id: u64, bucket_count: u64) -> u64 {
    if bucket_count.is_power_of_two() {
        (bucket_id + probe_count) & (bucket_count - 1)
    } else {
        (bucket_id + 1) % bucket_count
    }
}

fn first_bucket(key: u64, bucket_count: u64) -> u64 {
    hash_key(key, 0) % bucket_count
}

fn bucket_offset<V: TableValue>(bucket_id: u64) -> u64 {
    DENSE_HEADER_LEN as u64 + bucket_id * bucket_len::<V>() as u64
}

#[derive(Debug, Clone)]
pub struct DenseHashTable<V: TableValue> {
    buckets: Vec<Option<TableEntry<V>>>,
    used: u64,
    specials: SpecialKeys<V>,
}

impl<V: TableValue> DenseHashTable<V> {
    pub fn new(bucket_count: u64) -> TableResult<Self> {
        if bucket_count == 0 {
            return Err(TableError::invalid_key("dense table needs at least one bucket"));
        }
        Ok(Self {
            buckets: vec![None; bucket_count as usize],
            used: 0,
            specials: SpecialKeys::default(),
        })
    }

    /// Table sized for `keys` keys at a load of at most 80%.
    pub fn with_key_capacity(keys: u64) -> TableResult<Self> {
        Self::new((keys * 5 / 4 + 1).next_power_of_two())
    }

    pub fn bucket_count(&self) -> u64 {
        self.buckets.len() as u64
    }

    /// `(slot holding key, first empty slot on the probe path)`.
    fn locate(&self, key: u64) -> (Option<usize>, Option<usize>) {
        let n = self.bucket_count();
        let mut id = first_bucket(key, n);
        for count in 1..=n {
            match &self.buckets[id as usize] {
                None => return (None, Some(id as usize)),
                Some(e) if e.key == key => return (Some(id as usize), None),
                Some(_) => {}
            }
            id = probe(count, id, n);
        }
        (None, None)
    }

    fn put(&mut self, entry: TableEntry<V>) -> TableResult<()> {
        if is_special_key(entry.key) {
            self.specials.set(entry);
            return Ok(());
        }
        let slot = match self.locate(entry.key) {
            (Some(slot), _) => slot,
            (None, Some(slot)) => {
                self.used += 1;
                slot
            }
            (None, None) => {
                return Err(TableError::table_full(format!(
                    "dense table of {} buckets",
                    self.bucket_count()
                )));
            }
        };
        self.buckets[slot] = Some(entry);
        Ok(())
    }

    fn table_order(&self) -> Vec<TableEntry<V>> {
        self.buckets
            .iter()
            .flatten()
            .copied()
            .chain(self.specials.entries())
            .collect()
    }
}

impl<V: TableValue> PrefixKeyTable<V> for DenseHashTable<V> {
    fn table_type(&self) -> TableType {
        TableType::Dense
    }

    fn key_count(&self) -> u64 {
        self.used + self.specials.len()
    }

    fn find(&self, key: u64) -> TableResult<FindResult<V>> {
        if is_special_key(key) {
            return Ok(self.specials.find(key));
        }
        Ok(match self.locate(key) {
            (Some(slot), _) => self.buckets[slot].map_or(FindResult::NotFound, TableEntry::to_find_result),
            _ => FindResult::NotFound,
        })
    }
}

impl<V: TableValue> BuildTable<V> for DenseHashTable<V> {
    fn insert(&mut self, key: u64, value: V) -> TableResult<()> {
        self.put(TableEntry::live(key, value))
    }

    fn delete(&mut self, key: u64, value: V) -> TableResult<()> {
        self.put(TableEntry::tombstone(key, value))
    }

    fn stretch(&mut self) -> TableResult<()> {
        let mut grown = Self::new(self.bucket_count() * 2)?;
        for entry in self.table_order() {
            grown.put(entry)?;
        }
        tracing::debug!(from = self.bucket_count(), to = grown.bucket_count(), "stretched dense table");
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
            let mut rebuilt = Self::new(self.bucket_count())?;
            for entry in self.entries(IterateOrder::KeyOrder) {
                rebuilt.put(entry)?;
            }
            return rebuilt.encode(IterateOrder::TableOrder);
        }
        let len = bucket_len::<V>();
        let mut out = vec![0u8; DENSE_HEADER_LEN + self.buckets.len() * len];
        LittleEndian::write_u64(&mut out[0..8], self.bucket_count());
        LittleEndian::write_u64(&mut out[8..16], self.key_count());
        for (i, slot) in self.buckets.iter().enumerate() {
            let start = DENSE_HEADER_LEN + i * len;
            encode_bucket(slot.as_ref(), &mut out[start..start + len]);
        }
        if !self.specials.is_empty() {
            self.specials.encode(&mut out);
        }
        Ok(out)
    }
}

/// Read-only view of a dense table file.
#[derive(Debug)]
pub struct DenseHashTableFileReader<V: TableValue> {
    file: TableFile,
    bucket_count: u64,
    key_count: u64,
    specials: SpecialKeys<V>,
}

impl<V: TableValue> DenseHashTableFileReader<V> {
    pub fn open(file: TableFile) -> TableResult<Self> {
        if file.len() < DENSE_HEADER_LEN as u64 {
            return Err(TableError::corruption(format!(
                "dense table {} is {} bytes, shorter than its header",
                file.path(),
                file.len()
            )));
        }
        let header = file.read_at(0, DENSE_HEADER_LEN)?;
        let bucket_count = LittleEndian::read_u64(&header[0..8]);
        let key_count = LittleEndian::read_u64(&header[8..16]);
        if bucket_count == 0 {
            return Err(TableError::corruption(format!("dense table {} has no buckets", file.path())));
        }

        let len = bucket_len::<V>() as u64;
        let body = bucket_count
            .checked_mul(len)
            .and_then(|b| b.checked_add(DENSE_HEADER_LEN as u64))
            .ok_or_else(|| TableError::corruption(format!("dense table bucket count {bucket_count} overflows")))?;
        let specials = if file.len() == body {
            SpecialKeys::default()
        } else if file.len() == body + 2 * len {
            SpecialKeys::decode(&file.read_at(body, 2 * len as usize)?)?
        } else {
            return Err(TableError::corruption(format!(
                "dense table {} is {} bytes, expected {body} for {bucket_count} buckets",
                file.path(),
                file.len()
            )));
        };
        tracing::trace!(path = file.path(), bucket_count, key_count, "opened dense table");
        Ok(Self {
            file,
            bucket_count,
            key_count,
            specials,
        })
    }

    pub fn open_in(dir: &Directory, name: &str, open_type: FsOpenType) -> TableResult<Self> {
        Self::open(TableFile::new(dir.create_file_reader(name, open_type)?))
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    pub async fn find_async(&self, key: u64) -> TableResult<FindResult<V>> {
        if is_special_key(key) {
            return Ok(self.specials.find(key));
        }
        let n = self.bucket_count;
        let mut id = first_bucket(key, n);
        for count in 1..=n {
            let buf = self.file.read_at_async(bucket_offset::<V>(id), bucket_len::<V>()).await?;
            match decode_bucket::<V>(&buf)? {
                None => return Ok(FindResult::NotFound),
                Some(e) if e.key == key => return Ok(e.to_find_result()),
                Some(_) => {}
            }
            id = probe(count, id, n);
        }
        Ok(FindResult::NotFound)
    }
}

impl<V: TableValue> PrefixKeyTable<V> for DenseHashTableFileReader<V> {
    fn table_type(&self) -> TableType {
        TableType::Dense
    }

    fn key_count(&self) -> u64 {
        self.key_count
    }

    fn find(&self, key: u64) -> TableResult<FindResult<V>> {
        if is_special_key(key) {
            return Ok(self.specials.find(key));
        }
        let n = self.bucket_count;
        let mut id = first_bucket(key, n);
        for count in 1..=n {
            let buf = self.file.read_at(bucket_offset::<V>(id), bucket_len::<V>())?;
            match decode_bucket::<V>(&buf)? {
                None => return Ok(FindResult::NotFound),
                Some(e) if e.key == key => return Ok(e.to_find_result()),
                Some(_) => {}
            }
            id = probe(count, id, n);
        }
        Ok(FindResult::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{DELETE_KEY, EMPTY_KEY};

    #[test]
    fn test_probe_visits_every_bucket() {
        for n in [1u64, 7, 8, 100] {
            let mut seen = vec![false; n as usize];
            let mut id = 3 % n;
            for count in 1..=n {
                seen[id as usize] = true;
                id = probe(count, id, n);
            }
            assert!(seen.iter().all(|s| *s), "bucket count {n}");
        }
    }

    #[test]
    fn test_full_table_needs_stretch() {
        let mut table = DenseHashTable::<u64>::new(4).unwrap();
        for key in 0..4 {
            table.insert(key, key * 10).unwrap();
        }
        assert!(table.insert(99, 1).unwrap_err().is_table_full());
        table.insert(2, 21).unwrap();

        table.insert_or_stretch(99, 1).unwrap();
        assert_eq!(table.bucket_count(), 8);
        assert_eq!(table.find(2).unwrap(), FindResult::Ok(21));
        assert_eq!(table.find(99).unwrap(), FindResult::Ok(1));
        assert_eq!(table.key_count(), 5);
    }

    #[test]
    fn test_special_keys_stay_out_of_band() {
        let mut table = DenseHashTable::<u32>::new(2).unwrap();
        table.insert(EMPTY_KEY, 1).unwrap();
        table.delete(DELETE_KEY, 2).unwrap();
        table.insert(5, 3).unwrap();
        table.insert(6, 4).unwrap();
        assert_eq!(table.find(EMPTY_KEY).unwrap(), FindResult::Ok(1));
        assert_eq!(table.find(DELETE_KEY).unwrap(), FindResult::Deleted(2));
        assert_eq!(table.key_count(), 4);

        let image = table.encode(IterateOrder::TableOrder).unwrap();
        assert_eq!(image.len(), DENSE_HEADER_LEN + 4 * bucket_len::<u32>());
    }

    #[test]
    fn test_key_order_entries() {
        let mut table = DenseHashTable::<u64>::with_key_capacity(10).unwrap();
        for key in [9u64, 3, 7, 1] {
            table.insert(key, key).unwrap();
        }
        let keys: Vec<u64> = table.entries(IterateOrder::KeyOrder).iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 3, 7, 9]);
    }
}

//! Bucket layout shared by every table variant.
//!
//! A bucket is `[key u64][flags u8][value]`, little endian. Flags `0` marks
//! an empty slot; occupied slots carry [`FLAG_OCCUPIED`] and tombstones
//! additionally [`FLAG_DELETED`], keeping the last written value.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use strum::Display;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

use crate::error::{TableError, TableResult};

/// Sentinel key for empty slots; stored out of band when inserted.
pub const EMPTY_KEY: u64 = u64::MAX;
/// Sentinel key reserved for deleted slots; stored out of band when inserted.
pub const DELETE_KEY: u64 = u64::MAX - 1;

pub const FLAG_OCCUPIED: u8 = 0x01;
pub const FLAG_DELETED: u8 = 0x02;

const KEY_LEN: usize = 8;
const BUCKET_HEADER_LEN: usize = KEY_LEN + 1;

/// Fixed-width value stored in a bucket.
pub trait TableValue: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const SIZE: usize;

    fn write_to(&self, out: &mut [u8]);

    fn read_from(buf: &[u8]) -> Self;
}

impl TableValue for u64 {
    const SIZE: usize = 8;

    fn write_to(&self, out: &mut [u8]) {
        LittleEndian::write_u64(out, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl TableValue for u32 {
    const SIZE: usize = 4;

    fn write_to(&self, out: &mut [u8]) {
        LittleEndian::write_u32(out, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl TableValue for i64 {
    const SIZE: usize = 8;

    fn write_to(&self, out: &mut [u8]) {
        LittleEndian::write_i64(out, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

/// Outcome of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult<V> {
    /// Present with a live value.
    Ok(V),
    /// Present as a tombstone; carries the last written value.
    Deleted(V),
    NotFound,
}

impl<V> FindResult<V> {
    /// The live value, if any.
    pub fn value(self) -> Option<V> {
        match self {
            FindResult::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FindResult::Ok(_))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, FindResult::Deleted(_))
    }
}

/// Iteration order of a build table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterateOrder {
    /// Slot order; cheapest.
    TableOrder,
    /// Ascending keys.
    KeyOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TableType {
    Dense,
    Cuckoo,
    SeparateChain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableEntry<V> {
    pub key: u64,
    pub value: V,
    pub deleted: bool,
}

impl<V: Copy> TableEntry<V> {
    pub fn live(key: u64, value: V) -> Self {
        Self {
            key,
            value,
            deleted: false,
        }
    }

    pub fn tombstone(key: u64, value: V) -> Self {
        Self {
            key,
            value,
            deleted: true,
        }
    }

    pub fn to_find_result(self) -> FindResult<V> {
        if self.deleted {
            FindResult::Deleted(self.value)
        } else {
            FindResult::Ok(self.value)
        }
    }
}

pub const fn bucket_len<V: TableValue>() -> usize {
    BUCKET_HEADER_LEN + V::SIZE
}

pub fn encode_bucket<V: TableValue>(slot: Option<&TableEntry<V>>, out: &mut [u8]) {
    match slot {
        Some(entry) => {
            LittleEndian::write_u64(&mut out[..KEY_LEN], entry.key);
            out[KEY_LEN] = if entry.deleted {
                FLAG_OCCUPIED | FLAG_DELETED
            } else {
                FLAG_OCCUPIED
            };
            entry.value.write_to(&mut out[BUCKET_HEADER_LEN..BUCKET_HEADER_LEN + V::SIZE]);
        }
        None => {
            LittleEndian::write_u64(&mut out[..KEY_LEN], EMPTY_KEY);
            out[KEY_LEN..BUCKET_HEADER_LEN + V::SIZE].fill(0);
        }
    }
}

pub fn decode_bucket<V: TableValue>(buf: &[u8]) -> TableResult<Option<TableEntry<V>>> {
    let flags = buf[KEY_LEN];
    if flags == 0 {
        return Ok(None);
    }
    if flags & !(FLAG_OCCUPIED | FLAG_DELETED) != 0 || flags & FLAG_OCCUPIED == 0 {
        return Err(TableError::corruption(format!("bad bucket flags {flags:#04x}")));
    }
    Ok(Some(TableEntry {
        key: LittleEndian::read_u64(&buf[..KEY_LEN]),
        value: V::read_from(&buf[BUCKET_HEADER_LEN..BUCKET_HEADER_LEN + V::SIZE]),
        deleted: flags & FLAG_DELETED != 0,
    }))
}

/// Key of a string dictionary entry.
pub fn string_key(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}

pub(crate) fn hash_key(key: u64, seed: u64) -> u64 {
    xxh3_64_with_seed(&key.to_le_bytes(), seed)
}

pub(crate) fn is_special_key(key: u64) -> bool {
    key == EMPTY_KEY || key == DELETE_KEY
}

/// Out-of-band slots for the two sentinel keys.
///
/// Serialized as two trailing buckets, empty key first, and only when at
/// least one of them is set.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialKeys<V> {
    empty: Option<TableEntry<V>>,
    delete: Option<TableEntry<V>>,
}

impl<V> Default for SpecialKeys<V> {
    fn default() -> Self {
        Self {
            empty: None,
            delete: None,
        }
    }
}

impl<V: TableValue> SpecialKeys<V> {
    pub const ENCODED_LEN: usize = 2 * bucket_len::<V>();

    fn slot_mut(&mut self, key: u64) -> &mut Option<TableEntry<V>> {
        if key == EMPTY_KEY {
            &mut self.empty
        } else {
            &mut self.delete
        }
    }

    pub fn set(&mut self, entry: TableEntry<V>) {
        *self.slot_mut(entry.key) = Some(entry);
    }

    pub fn find(&self, key: u64) -> FindResult<V> {
        let slot = if key == EMPTY_KEY { &self.empty } else { &self.delete };
        slot.map_or(FindResult::NotFound, TableEntry::to_find_result)
    }

    pub fn is_empty(&self) -> bool {
        self.empty.is_none() && self.delete.is_none()
    }

    pub fn len(&self) -> u64 {
        self.empty.is_some() as u64 + self.delete.is_some() as u64
    }

    pub fn entries(&self) -> impl Iterator<Item = TableEntry<V>> + '_ {
        self.empty.iter().chain(self.delete.iter()).copied()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + Self::ENCODED_LEN, 0);
        let len = bucket_len::<V>();
        encode_bucket(self.empty.as_ref(), &mut out[start..start + len]);
        encode_bucket(self.delete.as_ref(), &mut out[start + len..start + 2 * len]);
    }

    pub fn decode(buf: &[u8]) -> TableResult<Self> {
        let len = bucket_len::<V>();
        let empty = decode_bucket::<V>(&buf[..len])?;
        let delete = decode_bucket::<V>(&buf[len..2 * len])?;
        if empty.is_some_and(|e| e.key != EMPTY_KEY) || delete.is_some_and(|e| e.key != DELETE_KEY) {
            return Err(TableError::corruption("special bucket holds a regular key"));
        }
        Ok(Self { empty, delete })
    }
}

/// Sort and keep the first entry of every key.
pub(crate) fn dedup_key_order<V>(mut entries: Vec<TableEntry<V>>) -> Vec<TableEntry<V>> {
    entries.sort_by_key(|e| e.key);
    entries.dedup_by_key(|e| e.key);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_flags() {
        let mut buf = vec![0u8; bucket_len::<u64>()];
        encode_bucket(Some(&TableEntry::tombstone(7, 42u64)), &mut buf);
        let entry = decode_bucket::<u64>(&buf).unwrap().unwrap();
        assert!(entry.deleted);
        assert_eq!(entry.to_find_result(), FindResult::Deleted(42));

        encode_bucket::<u64>(None, &mut buf);
        assert!(decode_bucket::<u64>(&buf).unwrap().is_none());

        buf[8] = 0x80;
        assert!(decode_bucket::<u64>(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_special_keys_round_trip() {
        let mut specials = SpecialKeys::<u32>::default();
        assert!(specials.is_empty());
        specials.set(TableEntry::live(EMPTY_KEY, 1));
        specials.set(TableEntry::tombstone(DELETE_KEY, 2));

        let mut buf = Vec::new();
        specials.encode(&mut buf);
        assert_eq!(buf.len(), SpecialKeys::<u32>::ENCODED_LEN);
        let decoded = SpecialKeys::<u32>::decode(&buf).unwrap();
        assert_eq!(decoded.find(EMPTY_KEY), FindResult::Ok(1));
        assert_eq!(decoded.find(DELETE_KEY), FindResult::Deleted(2));
        assert_eq!(decoded.len(), 2);
    }
}

//! Bucket heads with forward-linked overflow nodes.
//!
//! Inserts always prepend to the chain, so the first match in chain order
//! is the most recently inserted value for that key. Readers stop at the
//! first match.
//!
//! File: `[bucket_count u64][node_count u64][heads: u64 x bucket_count][nodes]`,
//! where a node is a bucket followed by the `u64` index of the next node.

use byteorder::{ByteOrder, LittleEndian};

use indexfs::{Directory, FsOpenType};

use crate::bucket::{
    FindResult, IterateOrder, TableEntry, TableType, TableValue, bucket_len, decode_bucket,
    dedup_key_order, encode_bucket, hash_key,
};
use crate::error::{TableError, TableResult};
use crate::file::TableFile;
use crate::table::{BuildTable, PrefixKeyTable};

pub const SEPARATE_CHAIN_HEADER_LEN: usize = 16;
const NO_NODE: u64 = u64::MAX;
const LINK_LEN: usize = 8;

fn bucket_of(key: u64, bucket_count: u64) -> u64 {
    hash_key(key, 0) % bucket_count
}

const fn node_len<V: TableValue>() -> usize {
    bucket_len::<V>() + LINK_LEN
}

#[derive(Debug, Clone, Copy)]
struct Node<V> {
    entry: TableEntry<V>,
    next: u64,
}

#[derive(Debug, Clone)]
pub struct SeparateChainHashTable<V: TableValue> {
    heads: Vec<u64>,
    /// In insertion order.
    nodes: Vec<Node<V>>,
}

impl<V: TableValue> SeparateChainHashTable<V> {
    pub fn new(bucket_count: u64) -> TableResult<Self> {
        if bucket_count == 0 {
            return Err(TableError::invalid_key("separate-chain table needs at least one bucket"));
        }
        Ok(Self {
            heads: vec![NO_NODE; bucket_count as usize],
            nodes: Vec::new(),
        })
    }

    pub fn bucket_count(&self) -> u64 {
        self.heads.len() as u64
    }

    fn prepend(&mut self, entry: TableEntry<V>) {
        let bucket = bucket_of(entry.key, self.bucket_count()) as usize;
        self.nodes.push(Node {
            entry,
            next: self.heads[bucket],
        });
        self.heads[bucket] = self.nodes.len() as u64 - 1;
    }

    fn chain(&self, bucket: usize) -> impl Iterator<Item = &TableEntry<V>> + '_ {
        let mut cursor = self.heads[bucket];
        std::iter::from_fn(move || {
            let node = self.nodes.get(cursor as usize)?;
            cursor = node.next;
            Some(&node.entry)
        })
    }

    fn table_order(&self) -> Vec<TableEntry<V>> {
        (0..self.heads.len())
            .flat_map(|bucket| self.chain(bucket).copied())
            .collect()
    }
}

impl<V: TableValue> PrefixKeyTable<V> for SeparateChainHashTable<V> {
    fn table_type(&self) -> TableType {
        TableType::SeparateChain
    }

    fn key_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    fn find(&self, key: u64) -> TableResult<FindResult<V>> {
        let bucket = bucket_of(key, self.bucket_count()) as usize;
        Ok(self
            .chain(bucket)
            .find(|e| e.key == key)
            .map_or(FindResult::NotFound, |e| e.to_find_result()))
    }
}

impl<V: TableValue> BuildTable<V> for SeparateChainHashTable<V> {
    fn insert(&mut self, key: u64, value: V) -> TableResult<()> {
        self.prepend(TableEntry::live(key, value));
        Ok(())
    }

    fn delete(&mut self, key: u64, value: V) -> TableResult<()> {
        self.prepend(TableEntry::tombstone(key, value));
        Ok(())
    }

    /// Doubles the bucket count. Nodes are replayed in insertion order, so
    /// every chain keeps its most-recent-first order.
    fn stretch(&mut self) -> TableResult<()> {
        let mut grown = Self::new(self.bucket_count() * 2)?;
        for node in &self.nodes {
            grown.prepend(node.entry);
        }
        *self = grown;
        Ok(())
    }

    /// Key order keeps only the most recent entry of every key.
    fn entries(&self, order: IterateOrder) -> Vec<TableEntry<V>> {
        match order {
            IterateOrder::TableOrder => self.table_order(),
            IterateOrder::KeyOrder => dedup_key_order(self.table_order()),
        }
    }

    fn encode(&self, order: IterateOrder) -> TableResult<Vec<u8>> {
        if order == IterateOrder::KeyOrder {
            let mut compact = Self::new(self.bucket_count())?;
            for entry in self.entries(IterateOrder::KeyOrder) {
                compact.prepend(entry);
            }
            return compact.encode(IterateOrder::TableOrder);
        }
        let heads_len = self.heads.len() * LINK_LEN;
        let node_len = node_len::<V>();
        let bucket_len = bucket_len::<V>();
        let mut out = vec![0u8; SEPARATE_CHAIN_HEADER_LEN + heads_len + self.nodes.len() * node_len];
        LittleEndian::write_u64(&mut out[0..8], self.bucket_count());
        LittleEndian::write_u64(&mut out[8..16], self.nodes.len() as u64);
        LittleEndian::write_u64_into(
            &self.heads,
            &mut out[SEPARATE_CHAIN_HEADER_LEN..SEPARATE_CHAIN_HEADER_LEN + heads_len],
        );
        let nodes_start = SEPARATE_CHAIN_HEADER_LEN + heads_len;
        for (i, node) in self.nodes.iter().enumerate() {
            let start = nodes_start + i * node_len;
            encode_bucket(Some(&node.entry), &mut out[start..start + bucket_len]);
            LittleEndian::write_u64(&mut out[start + bucket_len..start + node_len], node.next);
        }
        Ok(out)
    }
}

/// Read-only view of a separate-chain table file.
#[derive(Debug)]
pub struct SeparateChainHashTableFileReader<V: TableValue> {
    file: TableFile,
    bucket_count: u64,
    node_count: u64,
    _value: std::marker::PhantomData<V>,
}

impl<V: TableValue> SeparateChainHashTableFileReader<V> {
    pub fn open(file: TableFile) -> TableResult<Self> {
        if file.len() < SEPARATE_CHAIN_HEADER_LEN as u64 {
            return Err(TableError::corruption(format!(
                "separate-chain table {} is {} bytes, shorter than its header",
                file.path(),
                file.len()
            )));
        }
        let header = file.read_at(0, SEPARATE_CHAIN_HEADER_LEN)?;
        let bucket_count = LittleEndian::read_u64(&header[0..8]);
        let node_count = LittleEndian::read_u64(&header[8..16]);
        let expected = bucket_count
            .checked_mul(LINK_LEN as u64)
            .zip(node_count.checked_mul(node_len::<V>() as u64))
            .and_then(|(heads, nodes)| heads.checked_add(nodes))
            .and_then(|body| body.checked_add(SEPARATE_CHAIN_HEADER_LEN as u64));
        if bucket_count == 0 || expected != Some(file.len()) {
            return Err(TableError::corruption(format!(
                "separate-chain table {} is {} bytes, header declares {bucket_count} buckets and {node_count} nodes",
                file.path(),
                file.len()
            )));
        }
        tracing::trace!(path = file.path(), bucket_count, node_count, "opened separate-chain table");
        Ok(Self {
            file,
            bucket_count,
            node_count,
            _value: std::marker::PhantomData,
        })
    }

    pub fn open_in(dir: &Directory, name: &str, open_type: FsOpenType) -> TableResult<Self> {
        Self::open(TableFile::new(dir.create_file_reader(name, open_type)?))
    }

    fn head_offset(&self, key: u64) -> u64 {
        SEPARATE_CHAIN_HEADER_LEN as u64 + bucket_of(key, self.bucket_count) * LINK_LEN as u64
    }

    fn node_offset(&self, idx: u64) -> TableResult<u64> {
        if idx >= self.node_count {
            return Err(TableError::corruption(format!(
                "separate-chain table {} links to node {idx} of {}",
                self.file.path(),
                self.node_count
            )));
        }
        Ok(SEPARATE_CHAIN_HEADER_LEN as u64
            + self.bucket_count * LINK_LEN as u64
            + idx * node_len::<V>() as u64)
    }

    /// Decode one node: `(entry, next)`.
    fn decode_node(buf: &[u8]) -> TableResult<(TableEntry<V>, u64)> {
        let entry = decode_bucket::<V>(&buf[..bucket_len::<V>()])?
            .ok_or_else(|| TableError::corruption("empty separate-chain node"))?;
        Ok((entry, LittleEndian::read_u64(&buf[bucket_len::<V>()..])))
    }

    fn chain_too_long(&self) -> TableError {
        TableError::corruption(format!("separate-chain table {} has a cyclic chain", self.file.path()))
    }

    pub async fn find_async(&self, key: u64) -> TableResult<FindResult<V>> {
        let head = self.file.read_at_async(self.head_offset(key), LINK_LEN).await?;
        let mut cursor = LittleEndian::read_u64(&head);
        for _ in 0..=self.node_count {
            if cursor == NO_NODE {
                return Ok(FindResult::NotFound);
            }
            let buf = self
                .file
                .read_at_async(self.node_offset(cursor)?, node_len::<V>())
                .await?;
            let (entry, next) = Self::decode_node(&buf)?;
            if entry.key == key {
                return Ok(entry.to_find_result());
            }
            cursor = next;
        }
        Err(self.chain_too_long())
    }
}

impl<V: TableValue> PrefixKeyTable<V> for SeparateChainHashTableFileReader<V> {
    fn table_type(&self) -> TableType {
        TableType::SeparateChain
    }

    fn key_count(&self) -> u64 {
        self.node_count
    }

    fn find(&self, key: u64) -> TableResult<FindResult<V>> {
        let mut cursor = LittleEndian::read_u64(&self.file.read_at(self.head_offset(key), LINK_LEN)?);
        for _ in 0..=self.node_count {
            if cursor == NO_NODE {
                return Ok(FindResult::NotFound);
            }
            let buf = self.file.read_at(self.node_offset(cursor)?, node_len::<V>())?;
            let (entry, next) = Self::decode_node(&buf)?;
            if entry.key == key {
                return Ok(entry.to_find_result());
            }
            cursor = next;
        }
        Err(self.chain_too_long())
    }
}

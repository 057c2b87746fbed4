use indexfs::{Directory, WriterOption};

use crate::bucket::{FindResult, IterateOrder, TableEntry, TableType, TableValue};
use crate::error::TableResult;

/// Key lookups shared by build tables and file readers of every variant.
pub trait PrefixKeyTable<V: TableValue>: Send + Sync {
    fn table_type(&self) -> TableType;

    /// Keys recorded in the header (chain nodes for separate chaining).
    fn key_count(&self) -> u64;

    fn find(&self, key: u64) -> TableResult<FindResult<V>>;
}

/// In-memory table filled at build time and dumped to a file.
pub trait BuildTable<V: TableValue>: PrefixKeyTable<V> {
    fn insert(&mut self, key: u64, value: V) -> TableResult<()>;

    /// Record a tombstone carrying `value`.
    fn delete(&mut self, key: u64, value: V) -> TableResult<()>;

    /// Grow and rehash in place.
    fn stretch(&mut self) -> TableResult<()>;

    fn entries(&self, order: IterateOrder) -> Vec<TableEntry<V>>;

    /// File image of the table. `KeyOrder` rebuilds the layout from the
    /// key-sorted entries first.
    fn encode(&self, order: IterateOrder) -> TableResult<Vec<u8>>;

    /// Insert, stretching as often as needed.
    fn insert_or_stretch(&mut self, key: u64, value: V) -> TableResult<()> {
        loop {
            match self.insert(key, value) {
                Err(e) if e.is_table_full() => self.stretch()?,
                other => return other,
            }
        }
    }
}

/// Dump `table` into `dir/name`. Returns the file length.
pub fn write_table<V: TableValue>(
    dir: &Directory,
    name: &str,
    table: &dyn BuildTable<V>,
    order: IterateOrder,
    option: &WriterOption,
) -> TableResult<u64> {
    let bytes = table.encode(order)?;
    dir.write_file(name, &bytes, option)?;
    tracing::debug!(
        file = name,
        table = %table.table_type(),
        keys = table.key_count(),
        len = bytes.len(),
        "dumped hash table"
    );
    Ok(bytes.len() as u64)
}

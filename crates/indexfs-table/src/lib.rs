//! On-disk hash tables keyed by `u64`, stored as files of an
//! [`indexfs::IndexFileSystem`].
//!
//! Three layouts share one bucket format (see [`bucket`]): open addressing
//! ([`dense`]), blocked cuckoo hashing ([`cuckoo`]) and chained buckets
//! ([`separate_chain`]). Build tables live in memory and are dumped with
//! [`write_table`]; file readers look keys up through whatever open type the
//! file system hands back, slicing resident files and touching single cache
//! blocks otherwise.

pub mod bucket;
pub mod cuckoo;
pub mod dense;
pub mod error;
pub mod file;
pub mod separate_chain;
pub mod table;

pub use bucket::{DELETE_KEY, EMPTY_KEY, FindResult, IterateOrder, TableEntry, TableType, TableValue, string_key};
pub use cuckoo::{CuckooHashTable, CuckooHashTableFileReader};
pub use dense::{DenseHashTable, DenseHashTableFileReader};
pub use error::{TableError, TableResult};
pub use file::TableFile;
pub use separate_chain::{SeparateChainHashTable, SeparateChainHashTableFileReader};
pub use table::{BuildTable, PrefixKeyTable, write_table};

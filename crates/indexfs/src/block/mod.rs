//! Block cache and block-granular file access.

mod accessor;
mod cache;

pub use accessor::BlockFileAccessor;
pub use cache::{Block, BlockCache, BlockCacheOptions, BlockKey};

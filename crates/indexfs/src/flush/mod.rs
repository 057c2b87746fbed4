//! Flush pipeline: queued mkdir and file-flush operations committed to
//! the raw filesystem inline or on a background worker.

mod operation;
mod path_meta;
mod queue;

pub use operation::{
    Dumpable, FLUSH_CHUNK_SIZE, FileFlushOperation, FlushOperation, MkdirFlushOperation,
};
pub use path_meta::PathMetaContainer;
pub use queue::{DumpScheduler, FlushHandle, FlushOperationQueue};

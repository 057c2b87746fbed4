//! Package files: many logical files packed into shared physical data
//! files described by a JSON meta.

mod meta;
mod mount_table;
mod writer;

pub use meta::{InnerFileEntry, PAGE_SIZE, PackageFileMeta, data_path, meta_path};
pub use mount_table::{InnerFileMeta, PackageFileMountTable};
pub use writer::PackageFileWriter;

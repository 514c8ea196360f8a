mod error;
mod hash;
mod large_object;
mod mode;
mod traits;

pub mod postgres;

pub use error::StorageError;
pub use hash::{ContentHash, ContentHasher};
pub use large_object::{LargeObject, Oid};
#[cfg(test)]
pub(crate) use large_object::SQL_UNLINK;
pub use mode::OpenMode;
pub use traits::{BlobStore, BoxReader};

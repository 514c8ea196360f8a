use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;
use super::hash::ContentHash;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Content-addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return the content hash.
    async fn put(&self, data: &[u8]) -> Result<ContentHash, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(reader).await
    }

    /// Store data from an async reader and return the content hash.
    async fn put_stream(&self, reader: BoxReader) -> Result<ContentHash, StorageError>;

    /// Retrieve all bytes for a blob.
    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError>;

    /// Retrieve a blob as a reader.
    ///
    /// Large object descriptors cannot outlive their transaction, so the
    /// default reads the payload in full and serves it from memory.
    async fn get_stream(&self, hash: &ContentHash) -> Result<BoxReader, StorageError> {
        let data = self.get(hash).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    /// Whether a catalog entry exists and its backing object can be opened.
    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Delete a blob. Returns `false` if it was not stored.
    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Size of a blob in bytes.
    async fn size(&self, hash: &ContentHash) -> Result<u64, StorageError>;
}

use std::io::SeekFrom;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Unchanged, DatabaseConnection, DatabaseTransaction, Set,
    TransactionTrait,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

use super::error::StorageError;
use super::hash::{ContentHash, ContentHasher};
use super::large_object::LargeObject;
use super::mode::OpenMode;
use super::traits::{BlobStore, BoxReader};
use crate::catalog::FsObjectCatalog;
use crate::config::StorageConfig;
use crate::entity::fsobject;

/// Content-addressed blob store on PostgreSQL large objects.
///
/// Every call runs in its own transaction. Blobs are keyed by the hex SHA-256
/// of their content in the `fsobjects` catalog.
#[derive(Clone)]
pub struct PostgresBlobStore {
    db: DatabaseConnection,
    max_size: u64,
    chunk_size: usize,
}

impl PostgresBlobStore {
    pub fn new(db: DatabaseConnection, config: &StorageConfig) -> Self {
        Self {
            db,
            max_size: config.max_blob_size,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Store bytes with a human-readable description.
    pub async fn put_with_description(
        &self,
        data: &[u8],
        description: Option<String>,
    ) -> Result<ContentHash, StorageError> {
        self.store(data, description).await
    }

    /// The description recorded for a blob.
    pub async fn describe(&self, hash: &ContentHash) -> Result<Option<String>, StorageError> {
        let digest = hash.to_hex();
        let record = FsObjectCatalog::new(&self.db)
            .get_by_digest(&digest)
            .await?
            .ok_or(StorageError::NotFound(digest))?;
        Ok(record.description)
    }

    /// Copy `reader` into a fresh large object and register it under its hash.
    ///
    /// If the digest is already stored with a live object the fresh copy is
    /// unlinked again; a record whose object went missing is pointed at the
    /// fresh copy instead.
    #[instrument(skip(self, reader, description))]
    async fn store<R>(
        &self,
        mut reader: R,
        description: Option<String>,
    ) -> Result<ContentHash, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let txn = self.db.begin().await?;
        let mut lo = LargeObject::open(&txn, None, OpenMode::READ_WRITE).await?;

        let mut hasher = ContentHasher::default();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            total += n as u64;
            if total > self.max_size {
                // Dropping the transaction rolls the allocation back.
                return Err(StorageError::SizeLimitExceeded {
                    actual: total,
                    limit: self.max_size,
                });
            }

            hasher.update(&buf[..n]);
            lo.write_all(&buf[..n]).await?;
        }
        lo.close().await?;

        let hash = hasher.finalize();
        let digest = hash.to_hex();
        let oid = lo.oid();

        match FsObjectCatalog::new(&txn).get_by_digest(&digest).await? {
            Some(existing) if existing.check_lobject(&txn).await? => {
                lo.unlink().await?;
                debug!(%digest, "Blob already stored, dropped duplicate copy");
            }
            Some(existing) => {
                let model = fsobject::ActiveModel {
                    digest: Unchanged(existing.digest),
                    object_id: Set(oid.to_column()),
                    description: Set(description.or(existing.description)),
                };
                model.update(&txn).await?;
                debug!(%digest, %oid, "Re-attached blob to a record with a missing object");
            }
            None => {
                let model = fsobject::ActiveModel {
                    digest: Set(digest.clone()),
                    object_id: Set(oid.to_column()),
                    description: Set(description),
                };
                model.insert(&txn).await?;
                debug!(%digest, %oid, size = total, "Stored new blob");
            }
        }

        drop(lo);
        txn.commit().await?;
        Ok(hash)
    }

    /// Open the object behind `hash` read-only inside `txn`.
    async fn open_existing<'t>(
        &self,
        txn: &'t DatabaseTransaction,
        hash: &ContentHash,
    ) -> Result<LargeObject<'t, DatabaseTransaction>, StorageError> {
        let digest = hash.to_hex();
        let oid = FsObjectCatalog::new(txn)
            .get_by_digest(&digest)
            .await?
            .and_then(|record| record.oid())
            .ok_or_else(|| StorageError::NotFound(digest.clone()))?;

        match LargeObject::open(txn, Some(oid), OpenMode::READ).await {
            Ok(lo) => Ok(lo),
            Err(e) if e.is_storage_failure() => {
                debug!(%digest, %oid, error = %e, "Catalogued blob has no readable object");
                Err(StorageError::NotFound(digest))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BlobStore for PostgresBlobStore {
    async fn put(&self, data: &[u8]) -> Result<ContentHash, StorageError> {
        self.store(data, None).await
    }

    async fn put_stream(&self, reader: BoxReader) -> Result<ContentHash, StorageError> {
        self.store(reader, None).await
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let txn = self.db.begin().await?;
        let mut lo = self.open_existing(&txn, hash).await?;
        let data = lo.read_to_end(self.chunk_size).await?;
        lo.close().await?;
        drop(lo);
        txn.commit().await?;
        Ok(data)
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        match FsObjectCatalog::new(&self.db)
            .get_by_digest(&hash.to_hex())
            .await?
        {
            Some(record) => record.check_lobject(&self.db).await,
            None => Ok(false),
        }
    }

    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        let txn = self.db.begin().await?;
        let Some(mut record) = FsObjectCatalog::new(&txn)
            .get_by_digest(&hash.to_hex())
            .await?
        else {
            return Ok(false);
        };

        record.delete(&txn).await?;
        txn.commit().await?;
        Ok(true)
    }

    async fn size(&self, hash: &ContentHash) -> Result<u64, StorageError> {
        let txn = self.db.begin().await?;
        let mut lo = self.open_existing(&txn, hash).await?;
        let size = lo.seek(SeekFrom::End(0)).await?;
        lo.close().await?;
        drop(lo);
        txn.commit().await?;
        Ok(size)
    }
}

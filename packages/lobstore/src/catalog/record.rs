use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionSession, TransactionTrait,
};
use tracing::{debug, warn};

use crate::entity::fsobject;
use crate::storage::{LargeObject, Oid, OpenMode, StorageError};

impl fsobject::Model {
    /// A record that has no backing object yet.
    pub fn new(digest: impl Into<String>, description: Option<String>) -> Self {
        Self {
            digest: digest.into(),
            object_id: 0,
            description,
        }
    }

    /// The backing object, if one was ever allocated.
    pub fn oid(&self) -> Option<Oid> {
        Oid::from_column(self.object_id)
    }

    /// Open the backing large object, run `f` on it and close it again.
    ///
    /// A record without an object gets one allocated; the new OID is stored in
    /// `self` and written to the catalog row through `conn` before `f` runs, so
    /// later reads in the same transaction see it. The handle is closed on
    /// every path. A close rejected because the transaction is already aborted
    /// is ignored, any other close failure is returned.
    pub async fn with_lobject<'c, C, M, T, F>(
        &mut self,
        conn: &'c C,
        mode: M,
        f: F,
    ) -> Result<T, StorageError>
    where
        C: ConnectionTrait,
        M: TryInto<OpenMode>,
        StorageError: From<M::Error>,
        F: AsyncFnOnce(&mut LargeObject<'c, C>) -> Result<T, StorageError>,
    {
        let allocate = self.oid().is_none();
        let mut lo = LargeObject::open(conn, self.oid(), mode).await?;

        let result = if allocate {
            self.object_id = lo.oid().to_column();
            match self.save_object_id(conn).await {
                Ok(()) => f(&mut lo).await,
                Err(e) => {
                    // The fresh object is unreferenced.
                    self.object_id = 0;
                    if let Err(unlink) = lo.unlink().await {
                        warn!(
                            oid = %lo.oid(),
                            error = %unlink,
                            "Couldn't unlink unreferenced large object"
                        );
                    }
                    Err(e)
                }
            }
        } else {
            f(&mut lo).await
        };

        let closed = release(&mut lo).await;
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Whether the backing object exists and can be opened.
    ///
    /// Only openability is checked; the content is not compared to the digest.
    /// The probe runs in a nested transaction (a savepoint when `conn` is
    /// already a transaction), so a missing object does not abort the caller's
    /// transaction.
    pub async fn check_lobject<C>(&self, conn: &C) -> Result<bool, StorageError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let Some(oid) = self.oid() else {
            return Ok(false);
        };

        let probe = conn.begin().await?;
        let live = match LargeObject::open(&probe, Some(oid), OpenMode::READ).await {
            Ok(mut lo) => {
                lo.close().await?;
                true
            }
            Err(e) if e.is_storage_failure() => {
                debug!(digest = %self.digest, %oid, error = %e, "Large object is not openable");
                false
            }
            Err(e) => return Err(e),
        };
        probe.rollback().await?;

        Ok(live)
    }

    /// Unlink the backing object and remove the catalog row.
    ///
    /// Both happen through `conn`, so they share the caller's transaction and
    /// are undone together on rollback. A backing object that can no longer be
    /// opened is skipped and the row is removed anyway. Afterwards the record
    /// no longer refers to any object.
    pub async fn delete<C>(&mut self, conn: &C) -> Result<(), StorageError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if let Some(oid) = self.oid() {
            let scope = conn.begin().await?;
            let gone = match LargeObject::open(&scope, Some(oid), OpenMode::READ).await {
                Ok(mut lo) => {
                    lo.unlink().await?;
                    drop(lo);
                    None
                }
                Err(e) if e.is_storage_failure() => Some(e),
                Err(e) => return Err(e),
            };
            match gone {
                None => {
                    scope.commit().await?;
                }
                Some(e) => {
                    warn!(
                        digest = %self.digest,
                        %oid,
                        error = %e,
                        "Backing large object is gone, removing record only"
                    );
                    scope.rollback().await?;
                }
            }
            self.object_id = 0;
        }

        fsobject::Entity::delete_by_id(self.digest.clone())
            .exec(conn)
            .await?;

        debug!(digest = %self.digest, "Deleted stored file");
        Ok(())
    }

    async fn save_object_id<C: ConnectionTrait>(&self, conn: &C) -> Result<(), StorageError> {
        let updated = fsobject::Entity::update_many()
            .col_expr(fsobject::Column::ObjectId, Expr::value(self.object_id))
            .filter(fsobject::Column::Digest.eq(self.digest.as_str()))
            .exec(conn)
            .await?;
        if updated.rows_affected != 1 {
            return Err(StorageError::NotFound(self.digest.clone()));
        }
        Ok(())
    }
}

/// Close a scoped handle, tolerating a transaction that already failed.
async fn release<C: ConnectionTrait>(lo: &mut LargeObject<'_, C>) -> Result<(), StorageError> {
    match lo.close().await {
        Err(StorageError::TransactionAborted(e)) => {
            warn!(
                oid = %lo.oid(),
                error = %e,
                "Transaction already aborted, descriptor will be released when it ends"
            );
            Ok(())
        }
        other => other,
    }
}

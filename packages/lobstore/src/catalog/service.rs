use futures::stream::{self, BoxStream, StreamExt};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DbBackend, EntityName, EntityTrait, QueryOrder, Set,
    Statement, StreamTrait, TransactionTrait,
};
use tracing::info;

use crate::entity::fsobject;
use crate::storage::StorageError;

pub(crate) const SQL_TABLE_EXISTS: &str = "SELECT to_regclass($1) IS NOT NULL AS present";

/// Catalog queries over stored files.
pub struct FsObjectCatalog<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> FsObjectCatalog<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Insert a record for a new digest. It has no backing object until the
    /// first [`with_lobject`](fsobject::Model::with_lobject) call.
    pub async fn insert(
        &self,
        digest: &str,
        description: Option<String>,
    ) -> Result<fsobject::Model, StorageError> {
        let model = fsobject::ActiveModel {
            digest: Set(digest.to_string()),
            object_id: Set(0),
            description: Set(description),
        };
        Ok(model.insert(self.conn).await?)
    }

    pub async fn get_by_digest(&self, digest: &str) -> Result<Option<fsobject::Model>, StorageError> {
        Ok(fsobject::Entity::find_by_id(digest.to_string())
            .one(self.conn)
            .await?)
    }

    /// All records. Yields nothing when the table has not been created yet.
    pub async fn get_all(&self) -> Result<FsObjectScan, StorageError> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            SQL_TABLE_EXISTS,
            [fsobject::Entity.table_name().into()],
        );
        let provisioned = match self.conn.query_one_raw(stmt).await? {
            Some(row) => row.try_get("", "present")?,
            None => false,
        };
        Ok(FsObjectScan { provisioned })
    }

    /// Delete every record together with its large object.
    ///
    /// Records whose object has already disappeared are removed as well.
    /// Large objects that no record points to are invisible here and are
    /// left in place.
    pub async fn delete_all(&self) -> Result<u64, StorageError>
    where
        C: TransactionTrait,
    {
        let records = self.get_all().await?.fetch(self.conn).await?;

        let mut deleted = 0;
        for mut record in records {
            record.delete(self.conn).await?;
            deleted += 1;
        }

        info!(deleted, "Deleted all stored files");
        Ok(deleted)
    }
}

/// A re-runnable scan over the whole catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsObjectScan {
    provisioned: bool,
}

impl FsObjectScan {
    /// Whether the catalog table existed when the scan was prepared.
    pub fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    pub async fn fetch<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<fsobject::Model>, StorageError> {
        if !self.provisioned {
            return Ok(Vec::new());
        }
        Ok(fsobject::Entity::find()
            .order_by_asc(fsobject::Column::Digest)
            .all(conn)
            .await?)
    }

    /// Lazily stream the records.
    ///
    /// The stream holds the connection while it is alive; collect with
    /// [`fetch`](Self::fetch) instead when records are modified during the scan.
    pub async fn stream<'a, C>(
        &self,
        conn: &'a C,
    ) -> Result<BoxStream<'a, Result<fsobject::Model, StorageError>>, StorageError>
    where
        C: ConnectionTrait + StreamTrait + Send,
    {
        if !self.provisioned {
            return Ok(stream::empty().boxed());
        }
        let rows = fsobject::Entity::find()
            .order_by_asc(fsobject::Column::Digest)
            .stream(conn)
            .await?;
        Ok(rows.map(|row| row.map_err(StorageError::from)).boxed())
    }
}

use std::fmt;
use std::io::SeekFrom;
use std::num::NonZeroU32;

use sea_orm::{ConnectionTrait, DbBackend, QueryResult, Statement, Value};
use tracing::debug;

use super::error::StorageError;
use super::mode::{INV_READ, INV_WRITE, OpenMode};

pub(crate) const SQL_CREATE: &str = "SELECT lo_creat($1)::int8 AS loid";
pub(crate) const SQL_OPEN: &str = "SELECT lo_open($1::int8::oid, $2) AS fd";
pub(crate) const SQL_READ: &str = "SELECT loread($1, $2) AS data";
pub(crate) const SQL_WRITE: &str = "SELECT lowrite($1, $2) AS written";
pub(crate) const SQL_SEEK: &str = "SELECT lo_lseek64($1, $2, $3) AS pos";
pub(crate) const SQL_TELL: &str = "SELECT lo_tell64($1) AS pos";
pub(crate) const SQL_CLOSE: &str = "SELECT lo_close($1) AS status";
pub(crate) const SQL_UNLINK: &str = "SELECT lo_unlink($1::int8::oid)";

const SEEK_SET: i32 = 0;
const SEEK_CUR: i32 = 1;
const SEEK_END: i32 = 2;

/// Identifier of an allocated large object. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(NonZeroU32);

impl Oid {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Translate a catalog column value, where `0` means "not allocated".
    pub fn from_column(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().and_then(Self::new)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    pub fn to_column(self) -> i64 {
        i64::from(self.get())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A PostgreSQL large object opened inside one transaction.
///
/// The descriptor is only meaningful within the transaction `conn` belongs to,
/// so a `LargeObject` must be built again for every transaction and never
/// kept past commit or rollback. Each method issues exactly one statement;
/// nothing is buffered.
pub struct LargeObject<'c, C> {
    conn: &'c C,
    oid: Oid,
    fd: Option<i32>,
    mode: OpenMode,
}

impl<'c, C: ConnectionTrait> LargeObject<'c, C> {
    /// Open a large object, creating it first when `oid` is `None`.
    ///
    /// The mode is validated before anything is sent to the database.
    pub async fn open<M>(conn: &'c C, oid: Option<Oid>, mode: M) -> Result<Self, StorageError>
    where
        M: TryInto<OpenMode>,
        StorageError: From<M::Error>,
    {
        let mode = mode.try_into()?;

        let oid = match oid {
            Some(oid) => oid,
            None => create(conn).await?,
        };

        let row = call(
            conn,
            "open",
            SQL_OPEN,
            vec![oid.to_column().into(), mode.open_flags().into()],
        )
        .await?;
        let fd: i32 = row.try_get("", "fd")?;
        if fd == -1 {
            return Err(StorageError::Storage { primitive: "open" });
        }

        debug!(%oid, fd, %mode, "Opened large object");
        Ok(Self {
            conn,
            oid,
            fd: Some(fd),
            mode,
        })
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    fn fd(&self) -> Result<i32, StorageError> {
        self.fd.ok_or(StorageError::Closed)
    }

    /// Read at most `length` bytes from the current position.
    ///
    /// Fewer bytes may be returned; an empty buffer means the end was reached.
    pub async fn read(&mut self, length: usize) -> Result<Vec<u8>, StorageError> {
        let fd = self.fd()?;
        let length = i32::try_from(length).unwrap_or(i32::MAX);
        let row = call(self.conn, "read", SQL_READ, vec![fd.into(), length.into()]).await?;
        Ok(row.try_get("", "data")?)
    }

    /// Write bytes at the current position, returning how many were accepted.
    ///
    /// The count may be smaller than `buf.len()`; see [`write_all`](Self::write_all).
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        let fd = self.fd()?;
        let row = call(
            self.conn,
            "write",
            SQL_WRITE,
            vec![fd.into(), buf.to_vec().into()],
        )
        .await?;
        let written: i32 = row.try_get("", "written")?;
        usize::try_from(written).map_err(|_| StorageError::Storage { primitive: "write" })
    }

    /// Move the position and return the new absolute offset.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, StorageError> {
        let fd = self.fd()?;
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => {
                let n = i64::try_from(n)
                    .map_err(|_| StorageError::InvalidInput(format!("seek offset {n} is too large")))?;
                (n, SEEK_SET)
            }
            SeekFrom::Current(n) => (n, SEEK_CUR),
            SeekFrom::End(n) => (n, SEEK_END),
        };
        let row = call(
            self.conn,
            "seek",
            SQL_SEEK,
            vec![fd.into(), offset.into(), whence.into()],
        )
        .await?;
        position(&row, "seek")
    }

    pub async fn tell(&mut self) -> Result<u64, StorageError> {
        let fd = self.fd()?;
        let row = call(self.conn, "tell", SQL_TELL, vec![fd.into()]).await?;
        position(&row, "tell")
    }

    /// Close the descriptor. Closing an already closed object does nothing.
    ///
    /// The descriptor is forgotten before the statement is sent, so a failed
    /// close is never retried against the same descriptor.
    pub async fn close(&mut self) -> Result<(), StorageError> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };

        let row = call(self.conn, "close", SQL_CLOSE, vec![fd.into()]).await?;
        let status: i32 = row.try_get("", "status")?;
        if status == -1 {
            return Err(StorageError::Storage { primitive: "close" });
        }

        debug!(oid = %self.oid, fd, "Closed large object");
        Ok(())
    }

    /// Close (if needed) and delete the object. The content is gone for good
    /// once the transaction commits.
    pub async fn unlink(&mut self) -> Result<(), StorageError> {
        self.close().await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            SQL_UNLINK,
            [Value::from(self.oid.to_column())],
        );
        self.conn.query_all_raw(stmt).await?;

        debug!(oid = %self.oid, "Unlinked large object");
        Ok(())
    }

    /// Write the whole buffer, looping over partial writes.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), StorageError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(StorageError::Storage { primitive: "write" });
            }
            buf = &buf[n.min(buf.len())..];
        }
        Ok(())
    }

    /// Read from the current position until the end of the object.
    pub async fn read_to_end(&mut self, chunk_size: usize) -> Result<Vec<u8>, StorageError> {
        let mut data = Vec::new();
        loop {
            let chunk = self.read(chunk_size).await?;
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
    }
}

impl<C> Drop for LargeObject<'_, C> {
    fn drop(&mut self) {
        if let Some(fd) = self.fd {
            debug!(
                oid = %self.oid,
                fd,
                "Large object dropped while open, descriptor is released at transaction end"
            );
        }
    }
}

async fn create<C: ConnectionTrait>(conn: &C) -> Result<Oid, StorageError> {
    let row = call(conn, "create", SQL_CREATE, vec![(INV_READ | INV_WRITE).into()]).await?;
    let raw: i64 = row.try_get("", "loid")?;
    let oid = Oid::from_column(raw).ok_or(StorageError::Storage { primitive: "create" })?;
    debug!(%oid, "Allocated large object");
    Ok(oid)
}

/// Run a single-row primitive.
async fn call<C: ConnectionTrait>(
    conn: &C,
    primitive: &'static str,
    sql: &str,
    values: Vec<Value>,
) -> Result<QueryResult, StorageError> {
    let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
    let mut rows = conn.query_all_raw(stmt).await?;
    if rows.len() != 1 {
        return Err(StorageError::ProtocolViolation {
            primitive,
            rows: rows.len(),
        });
    }
    Ok(rows.swap_remove(0))
}

fn position(row: &QueryResult, primitive: &'static str) -> Result<u64, StorageError> {
    let pos: i64 = row.try_get("", "pos")?;
    u64::try_from(pos).map_err(|_| StorageError::Storage { primitive })
}

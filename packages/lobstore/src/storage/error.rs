use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// SQLSTATE raised by PostgreSQL for any command issued after an error
/// in the current transaction (`in_failed_sql_transaction`).
const IN_FAILED_SQL_TRANSACTION: &str = "25P02";

/// Errors that can occur while working with large objects and their catalog.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The open mode string is malformed. Raised before any statement is sent.
    #[error("invalid open mode {mode:?}: {reason}")]
    InvalidMode { mode: String, reason: &'static str },

    /// An argument cannot be expressed to the backend (e.g. an out-of-range offset).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The handle was already closed or unlinked.
    #[error("large object is closed")]
    Closed,

    /// A large-object primitive returned its failure sentinel.
    #[error("couldn't {primitive} large object")]
    Storage { primitive: &'static str },

    /// The enclosing transaction has failed and rejects further commands.
    #[error("transaction is aborted: {0}")]
    TransactionAborted(#[source] DbErr),

    /// A primitive returned a row count other than exactly one.
    #[error("protocol violation: {primitive} returned {rows} rows, expected 1")]
    ProtocolViolation { primitive: &'static str, rows: usize },

    #[error("database error: {0}")]
    Database(#[source] DbErr),

    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The provided content hash is invalid.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// The blob exceeds the configured size limit.
    #[error("blob exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error came from the backend refusing or failing a primitive,
    /// as opposed to caller misuse or a broken transaction.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Database(_))
    }
}

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        if sqlstate(&err).as_deref() == Some(IN_FAILED_SQL_TRANSACTION) {
            Self::TransactionAborted(err)
        } else {
            Self::Database(err)
        }
    }
}

impl From<std::convert::Infallible> for StorageError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

fn sqlstate(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Conn(e) | DbErr::Exec(e) | DbErr::Query(e) => e,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(e) => e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned()),
        _ => None,
    }
}

//! Store error types.

use agora_core::AgoraError;
use sqlx::error::ErrorKind as DbErrorKind;
use thiserror::Error;

/// SQLite primary result codes that mean "another connection holds a lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Errors raised by the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row addressed by key does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Table the row was looked up in.
        entity: &'static str,
        /// Key that was not found.
        id: i64,
    },

    /// A unique constraint was violated.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Constraint name, or the database's description of it.
        constraint: String,
    },

    /// A referenced row does not exist.
    #[error("foreign key constraint violated: {constraint}")]
    ForeignKeyViolation {
        /// Constraint name, or the database's description of it.
        constraint: String,
    },

    /// A row failed a check or not-null constraint.
    #[error("check constraint violated: {constraint}")]
    CheckViolation {
        /// Constraint name, or the database's description of it.
        constraint: String,
    },

    /// No connection became available within the pool's acquire timeout.
    #[error("timed out acquiring a database connection")]
    PoolTimeout,

    /// The request's deadline passed before the work finished.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Another writer held the database lock for longer than the busy timeout.
    #[error("database is busy: {0}")]
    Busy(String),

    /// The pool has been closed.
    #[error("database pool is closed")]
    Closed,

    /// A stored value could not be decoded into its Rust type.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Any other driver error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Returns `true` for failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolTimeout | Self::DeadlineExceeded | Self::Busy(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => Self::Closed,
            sqlx::Error::Database(db) => {
                let constraint = db
                    .constraint()
                    .map_or_else(|| db.message().to_string(), str::to_string);
                match db.kind() {
                    DbErrorKind::UniqueViolation => Self::UniqueViolation { constraint },
                    DbErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation { constraint },
                    DbErrorKind::CheckViolation | DbErrorKind::NotNullViolation => {
                        Self::CheckViolation { constraint }
                    }
                    _ => {
                        let primary = db
                            .code()
                            .and_then(|code| code.parse::<i32>().ok())
                            .map(|code| code & 0xff);
                        match primary {
                            Some(SQLITE_BUSY | SQLITE_LOCKED) => Self::Busy(db.message().to_string()),
                            _ => Self::Database(db.to_string()),
                        }
                    }
                }
            }
            decode @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)) => Self::Decode(decode.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(err.to_string())
    }
}

impl From<StoreError> for AgoraError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, .. } => Self::not_found(format!("{entity} not found")),
            StoreError::UniqueViolation { .. } => Self::conflict("already exists"),
            StoreError::ForeignKeyViolation { .. } | StoreError::CheckViolation { .. } => {
                Self::bad_request("request violates a data constraint")
            }
            StoreError::PoolTimeout
            | StoreError::DeadlineExceeded
            | StoreError::Busy(_)
            | StoreError::Closed => Self::upstream_unavailable("database busy", Some("database")),
            StoreError::Decode(_) | StoreError::Migration(_) | StoreError::Database(_) => {
                Self::internal_with_source("database failure", err)
            }
        }
    }
}

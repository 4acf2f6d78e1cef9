//! Storage error taxonomy shared by the executor, checkpoint store, event
//! store and queries.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by the relational store.
///
/// The split matters to the scheduler: [`StorageError::Transient`] is retried
/// with backoff, everything else halts the affected projection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Connectivity, locking or I/O failure. Safe to retry.
    #[error("transient storage error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A write violated a uniqueness, foreign-key or not-null rule.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description reported by the database.
        message: String,
    },

    /// A mutation could not be rendered for its table.
    #[error("invalid statement for table {table}: {reason}")]
    InvalidStatement {
        /// Target table.
        table: String,
        /// Why the statement was rejected.
        reason: String,
    },

    /// The SQL or its parameters do not match the database schema.
    #[error("schema mismatch: {message}")]
    Schema {
        /// Description reported by the database.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row was read from.
        table: String,
        /// Decoding failure.
        reason: String,
    },

    /// The connection mutex was poisoned by a panicking holder.
    #[error("database connection mutex poisoned")]
    Poisoned,
}

impl StorageError {
    /// Creates a transient error from any displayable cause.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a corrupt-row error.
    pub fn corrupt(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => return Self::ConstraintViolation { message },
            // SQLITE_ERROR: unknown table or column, or a syntax error.
            Some(ErrorCode::Unknown) => return Self::Schema { message },
            _ => {},
        }
        match err {
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::ToSqlConversionFailure(_) => Self::Schema { message },
            _ => Self::Transient { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    #[test]
    fn unique_violation_is_classified_as_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();

        let err: StorageError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, StorageError::ConstraintViolation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_table_is_permanent() {
        let conn = Connection::open_in_memory().unwrap();

        let err: StorageError = conn
            .execute("INSERT INTO missing VALUES ('a')", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, StorageError::Schema { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn column_type_mismatch_is_permanent() {
        let conn = Connection::open_in_memory().unwrap();

        let err: StorageError = conn
            .query_row("SELECT 'text'", [], |row| row.get::<_, i64>(0))
            .unwrap_err()
            .into();

        assert!(matches!(err, StorageError::Schema { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn busy_database_is_transient() {
        let err: StorageError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )
        .into();

        assert!(err.is_retryable());
    }
}

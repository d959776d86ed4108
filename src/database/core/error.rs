//! Error types for the database layer
//!
//! Drivers report [`DriverError`], which keeps the backend's native error code
//! so each driver can classify its own failures. [`Database`](crate::Database)
//! turns those into [`DatabaseError`] according to the shared error policy.

use std::fmt;
use thiserror::Error;

/// Native error code reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// SQLite primary and extended result codes
    Sqlite { primary: i32, extended: i32 },

    /// MySQL server error number and SQLSTATE
    Mysql { code: u16, state: String },

    /// PostgreSQL SQLSTATE
    Postgres(String),

    /// The connection was already released
    Closed,

    /// Failure without a backend code (I/O, type conversion, ...)
    Other,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Sqlite { extended, .. } => write!(f, "sqlite:{}", extended),
            ErrorCode::Mysql { code, state } => write!(f, "mysql:{}/{}", code, state),
            ErrorCode::Postgres(state) => write!(f, "postgres:{}", state),
            ErrorCode::Closed => write!(f, "closed"),
            ErrorCode::Other => write!(f, "other"),
        }
    }
}

/// Failure raised by a driver while talking to its connection
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    pub code: ErrorCode,
    pub message: String,
}

impl DriverError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Other, message)
    }

    pub fn closed() -> Self {
        Self::new(ErrorCode::Closed, "database connection is closed")
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(e: rusqlite::Error) -> Self {
        let code = match e.sqlite_error() {
            Some(err) => ErrorCode::Sqlite {
                primary: err.extended_code & 0xff,
                extended: err.extended_code,
            },
            None => ErrorCode::Other,
        };
        DriverError::new(code, e.to_string())
    }
}

/// Errors surfaced to callers of the database layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Missing or invalid connection settings
    #[error("configuration error: {0}")]
    Config(String),

    /// Lookup of a name that was never registered
    #[error("no database instance registered under '{0}'")]
    UnknownInstance(String),

    /// Any SQL failure that is not a duplicate-key conflict
    #[error("{0}")]
    Sql(String),
}

impl DatabaseError {
    pub fn missing_setting(name: &str) -> Self {
        DatabaseError::Config(format!(
            "this configuration parameter is missing: \"{}\"",
            name
        ))
    }

    /// Generic SQL failure, carrying the driver message only when asked to
    pub fn sql(detail: Option<&str>) -> Self {
        match detail {
            Some(message) => DatabaseError::Sql(format!("SQL error: {}", message)),
            None => DatabaseError::Sql("SQL error".to_string()),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DatabaseError::Config(_) | DatabaseError::UnknownInstance(_)
        )
    }
}

/// Outcome of a statement or transaction that did not fail fatally
///
/// A duplicate-key conflict is an expected result, not an error.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum QueryOutcome<T> {
    Completed(T),
    DuplicateKey,
}

impl<T> QueryOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, QueryOutcome::Completed(_))
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, QueryOutcome::DuplicateKey)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            QueryOutcome::Completed(value) => Some(value),
            QueryOutcome::DuplicateKey => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> QueryOutcome<U> {
        match self {
            QueryOutcome::Completed(value) => QueryOutcome::Completed(f(value)),
            QueryOutcome::DuplicateKey => QueryOutcome::DuplicateKey,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_message() {
        assert_eq!(DatabaseError::sql(None).to_string(), "SQL error");
        assert_eq!(
            DatabaseError::sql(Some("near \"x\": syntax error")).to_string(),
            "SQL error: near \"x\": syntax error"
        );
    }

    #[test]
    fn test_config_errors() {
        let err = DatabaseError::missing_setting("filename");
        assert!(err.is_config());
        assert!(err.to_string().contains("\"filename\""));
        assert!(DatabaseError::UnknownInstance("x".to_string()).is_config());
        assert!(!DatabaseError::sql(None).is_config());
    }

    #[test]
    fn test_outcome_helpers() {
        let done: QueryOutcome<u32> = QueryOutcome::Completed(3);
        assert!(done.is_completed());
        assert_eq!(done.clone().map(|v| v + 1).completed(), Some(4));

        let dup: QueryOutcome<u32> = QueryOutcome::DuplicateKey;
        assert!(dup.is_duplicate_key());
        assert_eq!(dup.completed(), None);
    }

    #[test]
    fn test_driver_error_from_rusqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (v TEXT NOT NULL)", []).unwrap();
        let err: DriverError = conn
            .execute("INSERT INTO t (v) VALUES (NULL)", [])
            .unwrap_err()
            .into();

        // SQLITE_CONSTRAINT_NOTNULL
        assert_eq!(
            err.code,
            ErrorCode::Sqlite {
                primary: 19,
                extended: 1299
            }
        );
        assert!(!err.message.is_empty());
    }
}

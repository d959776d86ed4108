//! Core database infrastructure
//!
//! This module provides the foundational components the [`Database`](crate::Database)
//! handle is built on:
//! - `Driver`: capability set every backend implements
//! - `SqliteDriver`, `MysqlDriver`, `PostgresDriver`: one driver per dialect
//! - `Value` / `ResultSet`: bound parameters and fetched rows
//! - error types shared by drivers and the database handle

mod driver;
mod error;
mod sqlite;
mod value;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

pub use driver::{guarded_upsert, upsert_by_lookup, Dialect, Driver, TransactionState};
pub use error::{DatabaseError, DriverError, ErrorCode, QueryOutcome};
pub use sqlite::SqliteDriver;
pub use value::{ResultSet, Value};

#[cfg(feature = "mysql")]
pub use self::mysql::MysqlDriver;
#[cfg(feature = "postgres")]
pub use self::postgres::{rewrite_placeholders, PostgresDriver};

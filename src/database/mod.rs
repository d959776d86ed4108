//! Database module
//!
//! This module provides all database functionality for polydb, organized into:
//!
//! - **core**: Drivers, values and errors shared by every backend
//! - **instance**: The [`Database`] handle with its transaction and error policy
//! - **registry**: Named, lazily built database instances
//! - **helpers**: Table, key/value and schema helpers bound to a `Database`
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── driver      # Driver trait, Dialect, TransactionState, upsert helpers
//! │   ├── sqlite      # Embedded backend (rusqlite)
//! │   ├── mysql       # MySQL backend (feature "mysql")
//! │   ├── postgres    # PostgreSQL backend (feature "postgres")
//! │   ├── value       # Value and ResultSet
//! │   └── error       # DriverError, DatabaseError, QueryOutcome
//! │
//! ├── instance        # Database handle
//! ├── registry        # Registry of named instances
//! │
//! └── helpers/        # Scoped helpers
//!     ├── table       # Row-level CRUD
//!     ├── hashtable   # Key/value store over the driver upsert
//!     └── schema      # Schema version and ordered migrations
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use polydb::database::{Database, QueryOutcome, Value};
//! use polydb::config::Settings;
//!
//! let mut db = Database::new(&Settings::sqlite("/tmp/app.sqlite3"))?;
//!
//! db.transaction(|db| {
//!     db.execute("CREATE TABLE IF NOT EXISTS users (email TEXT UNIQUE)", &[])?;
//!     match db.execute("INSERT INTO users VALUES (?)", &["a@example.com".into()])? {
//!         QueryOutcome::Completed(_) => println!("created"),
//!         QueryOutcome::DuplicateKey => println!("already there"),
//!     }
//!     Ok::<_, polydb::database::DatabaseError>(())
//! })?;
//! ```

pub mod core;
pub mod helpers;
mod instance;
mod registry;

pub use self::core::{
    guarded_upsert, upsert_by_lookup, DatabaseError, Dialect, Driver, DriverError, ErrorCode,
    QueryOutcome, ResultSet, SqliteDriver, TransactionState, Value,
};
pub use helpers::{Hashtable, Migration, Schema, Table};
pub use instance::Database;
pub use registry::{Registry, SharedDatabase};

#[cfg(feature = "mysql")]
pub use self::core::MysqlDriver;
#[cfg(feature = "postgres")]
pub use self::core::{rewrite_placeholders, PostgresDriver};

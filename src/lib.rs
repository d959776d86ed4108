#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! polydb - one execution and transaction surface over several SQL backends
//!
//! polydb hides the differences between SQLite, MySQL and PostgreSQL behind a
//! single [`Database`] handle: identifier quoting, case-sensitive pattern
//! matching, upserts, schema version storage and foreign key toggling are all
//! delegated to a per-dialect [`Driver`]. It can be used as both a library and
//! a command-line tool.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (always) | SQLite backend, config loading | `rusqlite`, `config` |
//! | `mysql` | MySQL backend | `mysql` |
//! | `postgres` | PostgreSQL backend | `postgres`, `bytes` |
//! | `all-drivers` | Both client/server backends | All above |
//! | `cli` | `polydb` binary | `clap`, `tracing-subscriber`, `tabled` |
//!
//! ## Choosing Features
//!
//! ```toml
//! # Embedded only
//! polydb = { version = "0.3", default-features = false }
//!
//! # Library with every backend
//! polydb = { version = "0.3", default-features = false, features = ["all-drivers"] }
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: drivers, the `Database` handle, the instance registry
//!   and the table/key-value/schema helpers
//! - **[`config`]**: connection settings and configuration file loading
//!
//! # Error Model
//!
//! Every fallible call returns a [`Result`]. Statements resolve to a
//! [`QueryOutcome`]: either `Completed` with their rows, or `DuplicateKey` when
//! a uniqueness constraint rejected the write. Everything else is a
//! [`DatabaseError`], raised after any open transaction has been rolled back.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use polydb::{Database, Registry, Settings};
//!
//! let registry = Registry::new();
//! registry.register("main", || Database::new(&Settings::sqlite("app.sqlite3")));
//!
//! let db = registry.get("main")?;
//! let mut db = db.lock();
//!
//! db.schema().check(&[&|db: &mut Database| {
//!     db.execute("CREATE TABLE kv (\"key\" TEXT PRIMARY KEY, \"value\" TEXT)", &[])?;
//!     Ok(())
//! }])?;
//!
//! db.hashtable("kv").put([("theme", "dark")]);
//! ```

pub mod config;
pub mod database;

pub use config::{PolyConfig, Settings};

pub use database::{
    Database, DatabaseError, Dialect, Driver, DriverError, ErrorCode, QueryOutcome, Registry,
    ResultSet, SharedDatabase, TransactionState, Value,
};

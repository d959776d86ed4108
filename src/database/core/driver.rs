//! Driver abstraction
//!
//! A [`Driver`] owns exactly one physical connection and knows the quirks of
//! its SQL dialect: identifier quoting, operator spelling, duplicate-key codes,
//! last-insert ids, schema version storage, foreign key toggling and upserts.
//! [`Database`](crate::Database) only ever talks to `dyn Driver`.

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use super::error::{DatabaseError, DriverError, ErrorCode};
use super::value::{ResultSet, Value};

/// SQL dialect spoken by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
    Postgres,
}

impl Dialect {
    pub fn all() -> Vec<Dialect> {
        vec![Dialect::Sqlite, Dialect::Mysql, Dialect::Postgres]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Settings that must be present before a connection is attempted
    pub fn required_settings(&self) -> &'static [&'static str] {
        match self {
            Dialect::Sqlite => &["filename"],
            Dialect::Mysql | Dialect::Postgres => &["hostname", "username", "password", "database"],
        }
    }
}

impl FromStr for Dialect {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgres" | "postgresql" | "pgsql" => Ok(Dialect::Postgres),
            _ => Err(DatabaseError::Config(format!(
                "database driver '{}' is not supported",
                s
            ))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Transaction state of a connection
///
/// Transactions never nest: beginning while `InTransaction` and
/// committing or rolling back while `Idle` are no-ops at the `Database` level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionState {
    #[default]
    Idle,
    InTransaction,
}

/// Capability set every backend provides
pub trait Driver: Send {
    fn dialect(&self) -> Dialect;

    /// Prepare and run one statement with positional `?` parameters
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, DriverError>;

    fn begin(&mut self) -> Result<(), DriverError>;
    fn commit(&mut self) -> Result<(), DriverError>;
    fn rollback(&mut self) -> Result<(), DriverError>;
    fn transaction_state(&self) -> TransactionState;

    fn enable_foreign_keys(&mut self) -> Result<(), DriverError>;
    fn disable_foreign_keys(&mut self) -> Result<(), DriverError>;

    /// Whether `code` is a uniqueness or primary key violation in this dialect
    fn is_duplicate_key_error(&self, code: &ErrorCode) -> bool;

    /// Quote a bare identifier. Never called with dotted or spaced expressions.
    fn escape(&self, identifier: &str) -> String;

    /// Dialect token for `LIKE` (case-sensitive) and `ILIKE` (case-insensitive).
    /// Empty for operators that need no translation.
    fn get_operator(&self, operator: &str) -> &'static str;

    fn last_id(&mut self) -> Result<i64, DriverError>;

    /// Stored schema version, creating its storage on first use
    fn schema_version(&mut self) -> Result<u32, DriverError>;
    fn set_schema_version(&mut self, version: u32) -> Result<(), DriverError>;

    /// Make the stored value of every key equal to the given one, all or nothing.
    ///
    /// Failures are absorbed: the work is rolled back and `false` returned.
    fn upsert(
        &mut self,
        table: &str,
        key_column: &str,
        value_column: &str,
        entries: &[(String, Value)],
    ) -> bool {
        guarded_upsert(self, table, |driver| {
            upsert_by_lookup(driver, table, key_column, value_column, entries)
        })
    }

    /// Release the connection. Further calls fail with [`ErrorCode::Closed`].
    fn close(&mut self);
    fn is_closed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Run `work` inside a transaction, converting any failure into `false`.
///
/// When a transaction is already open the work joins it, and a failure
/// rolls back the enclosing transaction.
pub fn guarded_upsert<D, F>(driver: &mut D, table: &str, work: F) -> bool
where
    D: Driver + ?Sized,
    F: FnOnce(&mut D) -> Result<(), DriverError>,
{
    let joined = driver.transaction_state() == TransactionState::InTransaction;

    let result = (|| {
        if !joined {
            driver.begin()?;
        }
        work(driver)?;
        if !joined {
            driver.commit()?;
        }
        Ok::<_, DriverError>(())
    })();

    match result {
        Ok(()) => {
            debug!("Upsert into {} committed", table);
            true
        }
        Err(e) => {
            warn!("Upsert into {} failed, rolling back: {}", table, e);
            if driver.transaction_state() == TransactionState::InTransaction {
                if let Err(rollback_err) = driver.rollback() {
                    warn!("Rollback after failed upsert failed: {}", rollback_err);
                }
            }
            false
        }
    }
}

/// Per-key read-then-write upsert
///
/// Each key is looked up first, then updated or inserted. Assumes a single
/// writer per connection: another connection may insert the same key between
/// the lookup and the write.
pub fn upsert_by_lookup<D: Driver + ?Sized>(
    driver: &mut D,
    table: &str,
    key_column: &str,
    value_column: &str,
    entries: &[(String, Value)],
) -> Result<(), DriverError> {
    let table = driver.escape(table);
    let key_column = driver.escape(key_column);
    let value_column = driver.escape(value_column);

    let select = format!("SELECT 1 FROM {} WHERE {}=?", table, key_column);
    let update = format!(
        "UPDATE {} SET {}=? WHERE {}=?",
        table, value_column, key_column
    );
    let insert = format!(
        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
        table, key_column, value_column
    );

    for (key, value) in entries {
        let key = Value::Text(key.clone());
        let existing = driver.run(&select, std::slice::from_ref(&key))?;

        if existing.is_empty() {
            driver.run(&insert, &[key, value.clone()])?;
        } else {
            driver.run(&update, &[value.clone(), key])?;
        }
    }

    Ok(())
}

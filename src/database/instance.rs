//! Database handle
//!
//! [`Database`] is the single object application code talks to. It owns one
//! [`Driver`], mediates every statement and transaction boundary, and applies
//! the same error policy whatever the backend:
//!
//! 1. any open transaction is rolled back,
//! 2. the raw driver message is appended to the query log,
//! 3. a duplicate-key conflict resolves to [`QueryOutcome::DuplicateKey`],
//! 4. anything else becomes [`DatabaseError::Sql`], carrying the driver message
//!    only when query logging is enabled.

use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::database::core::{
    DatabaseError, Dialect, Driver, DriverError, QueryOutcome, ResultSet, SqliteDriver,
    TransactionState, Value,
};
use crate::database::helpers::{Hashtable, Schema, Table};

#[cfg(feature = "mysql")]
use crate::database::core::MysqlDriver;
#[cfg(feature = "postgres")]
use crate::database::core::PostgresDriver;

pub struct Database {
    driver: Box<dyn Driver>,
    logs: Vec<String>,
    log_queries: bool,
    stopwatch: bool,
    query_count: u64,
}

impl Database {
    /// Validate `settings` and open the selected backend
    ///
    /// A missing or unknown `driver`, or a missing required key, fails before
    /// any connection attempt.
    pub fn new(settings: &Settings) -> Result<Self, DatabaseError> {
        let dialect = settings.dialect()?;
        settings.require(dialect.required_settings())?;
        let log_queries = settings.get_bool("log_queries")?;
        let stopwatch = settings.get_bool("stopwatch")?;

        let driver: Box<dyn Driver> = match dialect {
            Dialect::Sqlite => Box::new(SqliteDriver::new(settings)?),
            #[cfg(feature = "mysql")]
            Dialect::Mysql => Box::new(MysqlDriver::new(settings)?),
            #[cfg(feature = "postgres")]
            Dialect::Postgres => Box::new(PostgresDriver::new(settings)?),
            #[allow(unreachable_patterns)]
            other => {
                return Err(DatabaseError::Config(format!(
                    "database driver '{}' is not enabled in this build (enable the '{}' feature)",
                    other, other
                )))
            }
        };

        let mut db = Self::with_driver(driver);
        db.log_queries = log_queries;
        db.stopwatch = stopwatch;
        Ok(db)
    }

    /// Wrap an already opened driver
    pub fn with_driver(driver: Box<dyn Driver>) -> Self {
        Self {
            driver,
            logs: Vec::new(),
            log_queries: false,
            stopwatch: false,
            query_count: 0,
        }
    }

    /// Private in-memory SQLite database
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::new(&Settings::sqlite(":memory:"))
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn set_log_queries(&mut self, enabled: bool) {
        self.log_queries = enabled;
    }

    pub fn log_queries(&self) -> bool {
        self.log_queries
    }

    /// Record `DURATION=<seconds>` after every statement
    pub fn set_stopwatch(&mut self, enabled: bool) {
        self.stopwatch = enabled;
    }

    pub fn stopwatch(&self) -> bool {
        self.stopwatch
    }

    pub fn set_log_message(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    pub fn log_messages(&self) -> &[String] {
        &self.logs
    }

    /// Number of statements executed successfully
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    /// Embedded connection, when the backend is SQLite and still open
    pub fn as_sqlite(&self) -> Option<&Connection> {
        self.driver
            .as_any()
            .downcast_ref::<SqliteDriver>()
            .and_then(SqliteDriver::connection)
    }

    pub fn last_id(&mut self) -> Result<i64, DatabaseError> {
        self.driver.last_id().map_err(|e| self.sql_failure(e))
    }

    /// Release the connection; calling it again does nothing
    pub fn close_connection(&mut self) {
        if !self.driver.is_closed() {
            self.driver.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.driver.is_closed()
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Prepare and run one statement with positional `?` parameters
    pub fn execute(
        &mut self,
        sql: &str,
        values: &[Value],
    ) -> Result<QueryOutcome<ResultSet>, DatabaseError> {
        if self.log_queries {
            self.set_log_message(sql);
        }
        debug!("Executing SQL: {}", sql);

        let start = self.stopwatch.then(Instant::now);

        match self.driver.run(sql, values) {
            Ok(result) => {
                if let Some(start) = start {
                    self.set_log_message(format!("DURATION={}", start.elapsed().as_secs_f64()));
                }
                self.query_count += 1;
                Ok(QueryOutcome::Completed(result))
            }
            Err(e) => self.handle_sql_error(e),
        }
    }

    /// Run `work` inside a transaction and commit it
    ///
    /// If a transaction is already open the work joins it and leaves the
    /// commit to whoever opened it. When `work` fails, the transaction is
    /// rolled back and the error returned unchanged.
    pub fn transaction<T, E, F>(&mut self, work: F) -> Result<QueryOutcome<T>, E>
    where
        F: FnOnce(&mut Database) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let owner = self.driver.transaction_state() == TransactionState::Idle;
        if let Err(e) = self.begin_if_idle() {
            return self.handle_sql_error(e).map_err(E::from);
        }

        match work(self) {
            Ok(value) => {
                if owner {
                    if let Err(e) = self.commit_if_open() {
                        return self.handle_sql_error(e).map_err(E::from);
                    }
                }
                Ok(QueryOutcome::Completed(value))
            }
            Err(err) => {
                if let Err(e) = self.rollback_if_open() {
                    warn!("Rollback after failed transaction failed: {}", e);
                }
                Err(err)
            }
        }
    }

    /// Shared error policy for `execute` and `transaction`
    fn handle_sql_error<T>(&mut self, e: DriverError) -> Result<QueryOutcome<T>, DatabaseError> {
        if let Err(rollback_err) = self.rollback_if_open() {
            warn!("Rollback after SQL error failed: {}", rollback_err);
        }
        self.set_log_message(e.message.clone());

        if self.driver.is_duplicate_key_error(&e.code) {
            warn!("Duplicate key ({}): {}", e.code, e.message);
            return Ok(QueryOutcome::DuplicateKey);
        }

        error!("SQL error ({}): {}", e.code, e.message);
        Err(DatabaseError::sql(
            self.log_queries.then_some(e.message.as_str()),
        ))
    }

    fn sql_failure(&mut self, e: DriverError) -> DatabaseError {
        self.set_log_message(e.message.clone());
        error!("SQL error ({}): {}", e.code, e.message);
        DatabaseError::sql(self.log_queries.then_some(e.message.as_str()))
    }

    // =========================================================================
    // Transaction primitives
    // =========================================================================

    fn begin_if_idle(&mut self) -> Result<(), DriverError> {
        if self.driver.transaction_state() == TransactionState::Idle {
            self.driver.begin()?;
            debug!("Transaction started");
        }
        Ok(())
    }

    fn commit_if_open(&mut self) -> Result<(), DriverError> {
        if self.driver.transaction_state() == TransactionState::InTransaction {
            self.driver.commit()?;
            debug!("Transaction committed");
        }
        Ok(())
    }

    fn rollback_if_open(&mut self) -> Result<(), DriverError> {
        if self.driver.transaction_state() == TransactionState::InTransaction {
            self.driver.rollback()?;
            debug!("Transaction rolled back");
        }
        Ok(())
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.driver.transaction_state()
    }

    /// Begin a transaction unless one is already open
    pub fn start_transaction(&mut self) -> Result<(), DatabaseError> {
        self.begin_if_idle().map_err(|e| self.sql_failure(e))
    }

    /// Commit the open transaction, if any
    pub fn close_transaction(&mut self) -> Result<(), DatabaseError> {
        match self.commit_if_open() {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(rollback_err) = self.rollback_if_open() {
                    warn!("Rollback after failed commit failed: {}", rollback_err);
                }
                Err(self.sql_failure(e))
            }
        }
    }

    /// Roll back the open transaction, if any
    pub fn cancel_transaction(&mut self) -> Result<(), DatabaseError> {
        self.rollback_if_open().map_err(|e| self.sql_failure(e))
    }

    // =========================================================================
    // Dialect helpers
    // =========================================================================

    /// Quote an identifier, optionally qualified by a table
    ///
    /// Values containing a dot or a space are treated as pre-composed
    /// expressions and returned verbatim.
    pub fn escape_identifier(&self, value: &str, table: Option<&str>) -> String {
        if value.contains('.') || value.contains(' ') {
            return value.to_string();
        }

        match table.filter(|t| !t.is_empty()) {
            Some(table) => format!(
                "{}.{}",
                self.driver.escape(table),
                self.driver.escape(value)
            ),
            None => self.driver.escape(value),
        }
    }

    pub fn escape_identifier_list<S: AsRef<str>>(
        &self,
        values: &[S],
        table: Option<&str>,
    ) -> Vec<String> {
        values
            .iter()
            .map(|value| self.escape_identifier(value.as_ref(), table))
            .collect()
    }

    /// Dialect spelling of `LIKE` / `ILIKE`
    pub fn operator(&self, name: &str) -> &'static str {
        self.driver.get_operator(name)
    }

    pub fn enable_foreign_keys(&mut self) -> Result<(), DatabaseError> {
        self.driver
            .enable_foreign_keys()
            .map_err(|e| self.sql_failure(e))
    }

    pub fn disable_foreign_keys(&mut self) -> Result<(), DatabaseError> {
        self.driver
            .disable_foreign_keys()
            .map_err(|e| self.sql_failure(e))
    }

    pub fn schema_version(&mut self) -> Result<u32, DatabaseError> {
        self.driver.schema_version().map_err(|e| self.sql_failure(e))
    }

    pub fn set_schema_version(&mut self, version: u32) -> Result<(), DatabaseError> {
        self.driver
            .set_schema_version(version)
            .map_err(|e| self.sql_failure(e))
    }

    /// Key/value upsert through the driver; `false` when nothing was written
    pub fn upsert(
        &mut self,
        table: &str,
        key_column: &str,
        value_column: &str,
        entries: &[(String, Value)],
    ) -> bool {
        self.driver.upsert(table, key_column, value_column, entries)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub fn table(&mut self, name: &str) -> Table<'_> {
        Table::new(self, name)
    }

    pub fn hashtable(&mut self, name: &str) -> Hashtable<'_> {
        Hashtable::new(self, name)
    }

    pub fn schema(&mut self) -> Schema<'_> {
        Schema::new(self)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.driver.is_closed() {
            info!("Releasing {} connection", self.driver.dialect());
        }
        self.close_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let _ = db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE NOT NULL)",
            &[],
        )
        .unwrap();
        db
    }

    fn count_users(db: &mut Database) -> i64 {
        db.execute("SELECT COUNT(*) FROM users", &[])
            .unwrap()
            .completed()
            .and_then(|r| r.fetch_column().and_then(Value::as_i64))
            .unwrap()
    }

    #[test]
    fn test_missing_driver_is_config_error() {
        let result = Database::new(&Settings::default());
        assert!(matches!(result, Err(DatabaseError::Config(_))));
    }

    #[test]
    fn test_unknown_driver_is_config_error() {
        let result = Database::new(&Settings::new("oracle").with("filename", "x"));
        assert!(matches!(result, Err(DatabaseError::Config(_))));
    }

    #[test]
    fn test_missing_required_setting() {
        let err = Database::new(&Settings::new("sqlite")).err().unwrap();
        assert!(err.to_string().contains("filename"));
    }

    #[test]
    fn test_flags_from_settings() {
        let db = Database::new(
            &Settings::sqlite(":memory:")
                .with("log_queries", "true")
                .with("stopwatch", "1"),
        )
        .unwrap();
        assert!(db.log_queries());
        assert!(db.stopwatch());
    }

    #[test]
    fn test_execute_and_count() {
        let mut db = create_test_db();
        let outcome = db
            .execute("INSERT INTO users (email) VALUES (?)", &[Value::from("a@x")])
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(db.last_id().unwrap(), 1);
        assert_eq!(count_users(&mut db), 1);
        // CREATE, INSERT, SELECT
        assert_eq!(db.query_count(), 3);
    }

    #[test]
    fn test_query_log_and_stopwatch() {
        let mut db = create_test_db();
        assert!(db.log_messages().is_empty());

        db.set_log_queries(true);
        db.set_stopwatch(true);
        let _ = db.execute("SELECT 1", &[]).unwrap();

        let logs = db.log_messages();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0], "SELECT 1");
        assert!(logs[1].starts_with("DURATION="));
    }

    #[test]
    fn test_duplicate_key_returns_conflict() {
        let mut db = create_test_db();
        db.set_log_queries(true);
        let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])
            .unwrap();

        let outcome = db
            .execute("INSERT INTO users (email) VALUES ('a@x')", &[])
            .unwrap();
        assert!(outcome.is_duplicate_key());

        let last = db.log_messages().last().unwrap();
        assert!(last.contains("UNIQUE"));
        assert_eq!(count_users(&mut db), 1);
    }

    #[test]
    fn test_other_error_raises_and_rolls_back() {
        let mut db = create_test_db();
        db.start_transaction().unwrap();
        let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])
            .unwrap();

        let err = db
            .execute("INSERT INTO users (email) VALUES (NULL)", &[])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Sql(_)));
        assert_eq!(err.to_string(), "SQL error");
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert_eq!(count_users(&mut db), 0);
    }

    #[test]
    fn test_error_detail_only_when_logging() {
        let mut db = create_test_db();
        db.set_log_queries(true);
        let err = db.execute("SELECT * FROM missing_table", &[]).unwrap_err();
        assert!(err.to_string().starts_with("SQL error: "));
        assert!(err.to_string().contains("missing_table"));
    }

    #[test]
    fn test_sql_error_rolls_back_transaction_opened_with_sql() {
        let mut db = create_test_db();
        let _ = db.execute("BEGIN", &[]).unwrap();
        let _ = db
            .execute("INSERT INTO users (email) VALUES ('a@x')", &[])
            .unwrap();
        assert_eq!(db.transaction_state(), TransactionState::InTransaction);

        let err = db
            .execute("INSERT INTO users (email) VALUES (NULL)", &[])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Sql(_)));
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert!(db.as_sqlite().unwrap().is_autocommit());
        assert_eq!(count_users(&mut db), 0);
    }

    #[test]
    fn test_start_transaction_after_sql_begin_is_noop() {
        let mut db = create_test_db();
        let _ = db.execute("BEGIN", &[]).unwrap();

        db.start_transaction().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::InTransaction);

        let _ = db
            .execute("INSERT INTO users (email) VALUES ('a@x')", &[])
            .unwrap();
        db.close_transaction().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert_eq!(count_users(&mut db), 1);
    }

    #[test]
    fn test_transaction_commits() {
        let mut db = create_test_db();
        let outcome = db
            .transaction(|db| {
                let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])?;
                let _ = db.execute("INSERT INTO users (email) VALUES ('b@x')", &[])?;
                Ok::<_, DatabaseError>(db.last_id()?)
            })
            .unwrap();

        assert_eq!(outcome, QueryOutcome::Completed(2));
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert_eq!(count_users(&mut db), 2);
    }

    #[test]
    fn test_transaction_rolls_back_on_work_error() {
        let mut db = create_test_db();
        let result: Result<QueryOutcome<()>, anyhow::Error> = db.transaction(|db| {
            let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])?;
            Err(anyhow::anyhow!("changed my mind"))
        });

        assert_eq!(result.unwrap_err().to_string(), "changed my mind");
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert_eq!(count_users(&mut db), 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_sql_error() {
        let mut db = create_test_db();
        let result = db.transaction(|db| {
            let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])?;
            let _ = db.execute("INSERT INTO nowhere VALUES (1)", &[])?;
            Ok::<_, DatabaseError>(())
        });

        assert!(matches!(result, Err(DatabaseError::Sql(_))));
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert_eq!(count_users(&mut db), 0);
    }

    #[test]
    fn test_nested_transaction_joins_outer() {
        let mut db = create_test_db();
        db.start_transaction().unwrap();

        let inner = db.transaction(|db| {
            let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])?;
            Ok::<_, DatabaseError>(())
        });
        assert!(inner.unwrap().is_completed());
        // Still owned by the explicit start
        assert_eq!(db.transaction_state(), TransactionState::InTransaction);

        db.cancel_transaction().unwrap();
        assert_eq!(count_users(&mut db), 0);
    }

    #[test]
    fn test_transaction_primitives_are_idempotent() {
        let mut db = create_test_db();

        db.close_transaction().unwrap();
        db.cancel_transaction().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::Idle);

        db.start_transaction().unwrap();
        db.start_transaction().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::InTransaction);

        let _ = db.execute("INSERT INTO users (email) VALUES ('a@x')", &[])
            .unwrap();
        db.close_transaction().unwrap();
        db.close_transaction().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert_eq!(count_users(&mut db), 1);
    }

    #[test]
    fn test_escape_identifier() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.escape_identifier("title", None), "\"title\"");
        assert_eq!(
            db.escape_identifier("title", Some("tasks")),
            "\"tasks\".\"title\""
        );
        assert_eq!(db.escape_identifier("title", Some("")), "\"title\"");
    }

    #[test]
    fn test_escape_identifier_passes_expressions_through() {
        let db = Database::open_in_memory().unwrap();
        for value in ["tasks.title", "COUNT(*) AS total", "a b"] {
            assert_eq!(db.escape_identifier(value, None), value);
            assert_eq!(db.escape_identifier(value, Some("tasks")), value);
        }
    }

    #[test]
    fn test_escape_identifier_list() {
        let db = Database::open_in_memory().unwrap();
        let escaped = db.escape_identifier_list(&["a", "t.b", "c"], Some("t"));
        assert_eq!(escaped, vec!["\"t\".\"a\"", "t.b", "\"t\".\"c\""]);
    }

    #[test]
    fn test_schema_version_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), 0);
        db.set_schema_version(3).unwrap();
        assert_eq!(db.schema_version().unwrap(), 3);
    }

    #[test]
    fn test_upsert_through_database() {
        let mut db = Database::open_in_memory().unwrap();
        let _ = db.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)", &[])
            .unwrap();

        let entries = vec![
            ("a".to_string(), Value::from(1)),
            ("b".to_string(), Value::from(2)),
        ];
        assert!(db.upsert("kv", "k", "v", &entries));
        assert!(db.upsert("kv", "k", "v", &[("a".to_string(), Value::from(5))]));

        let rows = db
            .execute("SELECT k, v FROM kv ORDER BY k", &[])
            .unwrap()
            .completed()
            .unwrap()
            .rows;
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a"), Value::Integer(5)],
                vec![Value::from("b"), Value::Integer(2)],
            ]
        );
    }

    #[test]
    fn test_close_connection_is_idempotent() {
        let mut db = create_test_db();
        assert!(db.as_sqlite().is_some());

        db.close_connection();
        db.close_connection();
        assert!(db.is_closed());
        assert!(db.as_sqlite().is_none());
        assert!(db.execute("SELECT 1", &[]).is_err());
    }

    #[test]
    fn test_operator_translation() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.operator("ILIKE"), "LIKE");
        assert_eq!(db.operator("="), "");
    }
}

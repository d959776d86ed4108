//! SQLite driver
//!
//! Embedded file-based backend built on `rusqlite`. Schema version lives in the
//! engine's own `user_version` counter, so no bookkeeping table is needed.
//! Transaction state is read from the connection itself, so a `BEGIN` issued
//! as plain SQL is seen as well.

use std::any::Any;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection};
use tracing::info;

use super::driver::{Dialect, Driver, TransactionState};
use super::error::{DatabaseError, DriverError, ErrorCode};
use super::value::{ResultSet, Value};
use crate::config::Settings;

/// SQLite connection owned by a [`Database`](crate::Database)
pub struct SqliteDriver {
    conn: Option<Connection>,
}

impl SqliteDriver {
    /// Open the database named by the `filename` setting
    ///
    /// `:memory:` opens a private in-memory database.
    pub fn new(settings: &Settings) -> Result<Self, DatabaseError> {
        settings.require(Dialect::Sqlite.required_settings())?;
        let filename = settings.require_str("filename")?;

        let conn = if filename == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(filename)
        }
        .map_err(|e| {
            DatabaseError::Config(format!(
                "failed to open SQLite database at '{}': {}",
                filename, e
            ))
        })?;

        info!("Opened SQLite database at '{}'", filename);

        let mut driver = SqliteDriver { conn: Some(conn) };
        driver.enable_foreign_keys().map_err(|e| {
            DatabaseError::Config(format!("failed to enable foreign keys: {}", e))
        })?;
        Ok(driver)
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::new(&Settings::sqlite(":memory:"))
    }

    /// Underlying connection, while still open
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    fn conn(&self) -> Result<&Connection, DriverError> {
        self.conn.as_ref().ok_or_else(DriverError::closed)
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, DriverError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        if columns.is_empty() {
            let affected = stmt.execute(params_from_iter(params.iter()))?;
            return Ok(ResultSet::affected(affected as u64));
        }

        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(value_from_ref(row.get_ref(idx)?));
            }
            rows.push(values);
        }

        Ok(ResultSet {
            columns,
            rows,
            affected_rows: 0,
        })
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let conn = self.conn()?;
        // SQLite may already have rolled back on its own (e.g. SQLITE_FULL)
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn transaction_state(&self) -> TransactionState {
        match &self.conn {
            Some(conn) if !conn.is_autocommit() => TransactionState::InTransaction,
            _ => TransactionState::Idle,
        }
    }

    fn enable_foreign_keys(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(())
    }

    fn disable_foreign_keys(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("PRAGMA foreign_keys = OFF")?;
        Ok(())
    }

    fn is_duplicate_key_error(&self, code: &ErrorCode) -> bool {
        matches!(
            code,
            ErrorCode::Sqlite { extended, .. }
                if *extended == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || *extended == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    }

    fn escape(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier)
    }

    fn get_operator(&self, operator: &str) -> &'static str {
        match operator {
            "LIKE" | "ILIKE" => "LIKE",
            _ => "",
        }
    }

    fn last_id(&mut self) -> Result<i64, DriverError> {
        Ok(self.conn()?.last_insert_rowid())
    }

    fn schema_version(&mut self) -> Result<u32, DriverError> {
        let version: i64 = self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        u32::try_from(version)
            .map_err(|_| DriverError::other(format!("invalid schema version: {}", version)))
    }

    fn set_schema_version(&mut self, version: u32) -> Result<(), DriverError> {
        // user_version is a signed 32-bit integer; larger values are dropped
        if i32::try_from(version).is_err() {
            return Err(DriverError::other(format!(
                "schema version {} exceeds the SQLite maximum of {}",
                version,
                i32::MAX
            )));
        }
        // PRAGMA values cannot be bound as parameters
        self.conn()?
            .execute_batch(&format!("PRAGMA user_version = {}", version))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("Failed to close SQLite connection cleanly: {}", e);
            }
            info!("Closed SQLite connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_driver() -> SqliteDriver {
        SqliteDriver::open_in_memory().unwrap()
    }

    fn create_kv_table(driver: &mut SqliteDriver) {
        driver
            .run(
                "CREATE TABLE settings (option TEXT PRIMARY KEY, value TEXT)",
                &[],
            )
            .unwrap();
    }

    fn read_kv(driver: &mut SqliteDriver) -> Vec<(String, String)> {
        driver
            .run("SELECT option, value FROM settings ORDER BY option", &[])
            .unwrap()
            .rows
            .into_iter()
            .map(|row| (row[0].to_string(), row[1].to_string()))
            .collect()
    }

    #[test]
    fn test_open_in_memory() {
        let driver = SqliteDriver::open_in_memory();
        assert!(driver.is_ok());
    }

    #[test]
    fn test_missing_filename() {
        let result = SqliteDriver::new(&Settings::new("sqlite"));
        assert!(matches!(result, Err(DatabaseError::Config(_))));
    }

    #[test]
    fn test_escape() {
        let driver = create_test_driver();
        assert_eq!(driver.escape("title"), "\"title\"");
    }

    #[test]
    fn test_get_operator() {
        let driver = create_test_driver();
        assert_eq!(driver.get_operator("LIKE"), "LIKE");
        assert_eq!(driver.get_operator("ILIKE"), "LIKE");
        assert_eq!(driver.get_operator("="), "");
    }

    #[test]
    fn test_run_select_and_insert() {
        let mut driver = create_test_driver();
        driver
            .run("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();

        let inserted = driver
            .run("INSERT INTO test (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        assert_eq!(inserted.affected_rows, 1);
        assert_eq!(driver.last_id().unwrap(), 1);

        let rows = driver.run("SELECT id, name FROM test", &[]).unwrap();
        assert_eq!(rows.columns, vec!["id", "name"]);
        assert_eq!(rows.rows, vec![vec![Value::Integer(1), Value::from("a")]]);
    }

    #[test]
    fn test_duplicate_key_classification() {
        let mut driver = create_test_driver();
        create_kv_table(&mut driver);
        driver
            .run("INSERT INTO settings VALUES ('a', '1')", &[])
            .unwrap();

        let err = driver
            .run("INSERT INTO settings VALUES ('a', '2')", &[])
            .unwrap_err();
        assert!(driver.is_duplicate_key_error(&err.code));

        // Codes from another dialect are never duplicates here
        let foreign = ErrorCode::Mysql {
            code: 1062,
            state: "23000".to_string(),
        };
        assert!(!driver.is_duplicate_key_error(&foreign));
    }

    #[test]
    fn test_not_null_is_not_duplicate() {
        let mut driver = create_test_driver();
        driver
            .run("CREATE TABLE strict_t (v TEXT NOT NULL)", &[])
            .unwrap();
        let err = driver
            .run("INSERT INTO strict_t (v) VALUES (NULL)", &[])
            .unwrap_err();
        assert!(!driver.is_duplicate_key_error(&err.code));
    }

    #[test]
    fn test_schema_version() {
        let mut driver = create_test_driver();
        assert_eq!(driver.schema_version().unwrap(), 0);

        driver.set_schema_version(3).unwrap();
        assert_eq!(driver.schema_version().unwrap(), 3);
    }

    #[test]
    fn test_foreign_keys_toggle() {
        let mut driver = create_test_driver();
        driver
            .run("CREATE TABLE parent (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        driver
            .run(
                "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id))",
                &[],
            )
            .unwrap();

        // Enabled on open
        assert!(driver
            .run("INSERT INTO child (parent_id) VALUES (42)", &[])
            .is_err());

        driver.disable_foreign_keys().unwrap();
        assert!(driver
            .run("INSERT INTO child (parent_id) VALUES (42)", &[])
            .is_ok());

        driver.enable_foreign_keys().unwrap();
        assert!(driver
            .run("INSERT INTO child (parent_id) VALUES (43)", &[])
            .is_err());
    }

    #[test]
    fn test_upsert_inserts_then_overwrites() {
        let mut driver = create_test_driver();
        create_kv_table(&mut driver);

        let first = vec![
            ("a".to_string(), Value::from(1)),
            ("b".to_string(), Value::from(2)),
        ];
        assert!(driver.upsert("settings", "option", "value", &first));
        assert_eq!(
            read_kv(&mut driver),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );

        assert!(driver.upsert("settings", "option", "value", &[("a".to_string(), Value::from(5))]));
        assert_eq!(
            read_kv(&mut driver),
            vec![
                ("a".to_string(), "5".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert_eq!(driver.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_upsert_failure_rolls_back() {
        let mut driver = create_test_driver();
        driver
            .run(
                "CREATE TABLE settings (option TEXT PRIMARY KEY, value TEXT NOT NULL)",
                &[],
            )
            .unwrap();

        let entries = vec![
            ("a".to_string(), Value::from("1")),
            ("b".to_string(), Value::Null),
        ];
        assert!(!driver.upsert("settings", "option", "value", &entries));

        let count = driver.run("SELECT COUNT(*) FROM settings", &[]).unwrap();
        assert_eq!(count.fetch_column(), Some(&Value::Integer(0)));
        assert_eq!(driver.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_upsert_missing_table_reports_false() {
        let mut driver = create_test_driver();
        assert!(!driver.upsert("nope", "k", "v", &[("a".to_string(), Value::from(1))]));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut driver = create_test_driver();
        driver.close();
        driver.close();
        assert!(driver.is_closed());

        let err = driver.run("SELECT 1", &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::Closed);
    }

    #[test]
    fn test_schema_version_out_of_range() {
        let mut driver = create_test_driver();
        driver.set_schema_version(7).unwrap();

        let too_large = i32::MAX as u32 + 1;
        let err = driver.set_schema_version(too_large).unwrap_err();
        assert_eq!(err.code, ErrorCode::Other);
        assert_eq!(driver.schema_version().unwrap(), 7);

        driver.set_schema_version(i32::MAX as u32).unwrap();
        assert_eq!(driver.schema_version().unwrap(), i32::MAX as u32);
    }

    #[test]
    fn test_transaction_state_follows_connection() {
        let mut driver = create_test_driver();
        assert_eq!(driver.transaction_state(), TransactionState::Idle);

        driver.run("BEGIN", &[]).unwrap();
        assert_eq!(driver.transaction_state(), TransactionState::InTransaction);

        driver.run("COMMIT", &[]).unwrap();
        assert_eq!(driver.transaction_state(), TransactionState::Idle);

        driver.begin().unwrap();
        assert_eq!(driver.transaction_state(), TransactionState::InTransaction);
        driver.close();
        assert_eq!(driver.transaction_state(), TransactionState::Idle);
    }
}

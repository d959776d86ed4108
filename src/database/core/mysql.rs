//! MySQL driver
//!
//! Client/server backend built on the synchronous `mysql` client. Sessions run
//! in strict mode, and the schema version is kept in a one-row table.

use std::any::Any;

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Params};
use tracing::info;

use super::driver::{guarded_upsert, Dialect, Driver, TransactionState};
use super::error::{DatabaseError, DriverError, ErrorCode};
use super::value::{ResultSet, Value};
use crate::config::Settings;

/// ER_DUP_ENTRY
const ER_DUP_ENTRY: u16 = 1062;
/// ER_DUP_ENTRY_WITH_KEY_NAME
const ER_DUP_ENTRY_WITH_KEY_NAME: u16 = 1586;

pub struct MysqlDriver {
    conn: Option<Conn>,
    state: TransactionState,
    schema_table: String,
}

impl MysqlDriver {
    pub fn new(settings: &Settings) -> Result<Self, DatabaseError> {
        settings.require(Dialect::Mysql.required_settings())?;

        let hostname = settings.require_str("hostname")?;
        let database = settings.require_str("database")?;
        let charset = settings.get("charset").unwrap_or("utf8mb4");

        let mut opts = OptsBuilder::new()
            .ip_or_hostname(Some(hostname))
            .user(settings.get("username"))
            .pass(settings.get("password"))
            .db_name(Some(database))
            .init(vec![
                "SET sql_mode = STRICT_ALL_TABLES".to_string(),
                format!("SET NAMES {}", charset),
            ]);
        if let Some(port) = settings.get_parsed::<u16>("port")? {
            opts = opts.tcp_port(port);
        }

        let conn = Conn::new(opts).map_err(|e| {
            DatabaseError::Config(format!(
                "failed to connect to MySQL at '{}': {}",
                hostname, e
            ))
        })?;

        info!("Connected to MySQL database '{}' on '{}'", database, hostname);

        Ok(MysqlDriver {
            conn: Some(conn),
            state: TransactionState::Idle,
            schema_table: settings
                .get("schema_table")
                .unwrap_or("schema_version")
                .to_string(),
        })
    }

    fn conn(&mut self) -> Result<&mut Conn, DriverError> {
        self.conn.as_mut().ok_or_else(DriverError::closed)
    }

    fn exec_plain(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn()?.query_drop(sql)?;
        Ok(())
    }
}

impl Driver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, DriverError> {
        let params = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(to_mysql).collect())
        };

        let conn = self.conn()?;
        let mut result = conn.exec_iter(sql, params)?;
        let columns: Vec<String> = result
            .columns()
            .as_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();
        let affected_rows = result.affected_rows();

        let mut rows = Vec::new();
        for row in result.by_ref() {
            rows.push(row?.unwrap().into_iter().map(from_mysql).collect());
        }

        Ok(ResultSet {
            columns,
            rows,
            affected_rows,
        })
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.exec_plain("START TRANSACTION")?;
        self.state = TransactionState::InTransaction;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.exec_plain("COMMIT")?;
        self.state = TransactionState::Idle;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let result = self.exec_plain("ROLLBACK");
        self.state = TransactionState::Idle;
        result
    }

    fn transaction_state(&self) -> TransactionState {
        self.state
    }

    fn enable_foreign_keys(&mut self) -> Result<(), DriverError> {
        self.exec_plain("SET FOREIGN_KEY_CHECKS=1")
    }

    fn disable_foreign_keys(&mut self) -> Result<(), DriverError> {
        self.exec_plain("SET FOREIGN_KEY_CHECKS=0")
    }

    fn is_duplicate_key_error(&self, code: &ErrorCode) -> bool {
        matches!(
            code,
            ErrorCode::Mysql { code, .. }
                if *code == ER_DUP_ENTRY || *code == ER_DUP_ENTRY_WITH_KEY_NAME
        )
    }

    fn escape(&self, identifier: &str) -> String {
        format!("`{}`", identifier)
    }

    fn get_operator(&self, operator: &str) -> &'static str {
        match operator {
            "LIKE" => "LIKE BINARY",
            "ILIKE" => "LIKE",
            _ => "",
        }
    }

    fn last_id(&mut self) -> Result<i64, DriverError> {
        let id = self.conn()?.last_insert_id();
        i64::try_from(id).map_err(|_| DriverError::other(format!("insert id out of range: {}", id)))
    }

    fn schema_version(&mut self) -> Result<u32, DriverError> {
        let table = self.escape(&self.schema_table);
        self.exec_plain(&format!(
            "CREATE TABLE IF NOT EXISTS {} (`version` INT DEFAULT '0')",
            table
        ))?;

        let current = self.run(&format!("SELECT `version` FROM {}", table), &[])?;
        match current.fetch_column() {
            Some(value) => value
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| DriverError::other(format!("invalid schema version: {}", value))),
            None => {
                self.exec_plain(&format!("INSERT INTO {} VALUES(0)", table))?;
                Ok(0)
            }
        }
    }

    fn set_schema_version(&mut self, version: u32) -> Result<(), DriverError> {
        let table = self.escape(&self.schema_table);
        self.run(
            &format!("UPDATE {} SET `version`=?", table),
            &[Value::from(version)],
        )?;
        Ok(())
    }

    /// One `REPLACE INTO` statement for the whole mapping
    fn upsert(
        &mut self,
        table: &str,
        key_column: &str,
        value_column: &str,
        entries: &[(String, Value)],
    ) -> bool {
        if entries.is_empty() {
            return true;
        }

        let sql = replace_statement(self, table, key_column, value_column, entries.len());
        let mut params = Vec::with_capacity(entries.len() * 2);
        for (key, value) in entries {
            params.push(Value::Text(key.clone()));
            params.push(value.clone());
        }

        guarded_upsert(self, table, |driver| driver.run(&sql, &params).map(|_| ()))
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            self.state = TransactionState::Idle;
            info!("Closed MySQL connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn replace_statement(
    driver: &MysqlDriver,
    table: &str,
    key_column: &str,
    value_column: &str,
    count: usize,
) -> String {
    format!(
        "REPLACE INTO {} ({}, {}) VALUES {}",
        driver.escape(table),
        driver.escape(key_column),
        driver.escape(value_column),
        vec!["(?, ?)"; count].join(", ")
    )
}

impl From<mysql::Error> for DriverError {
    fn from(e: mysql::Error) -> Self {
        let code = match &e {
            mysql::Error::MySqlError(err) => ErrorCode::Mysql {
                code: err.code,
                state: err.state.clone(),
            },
            _ => ErrorCode::Other,
        };
        DriverError::new(code, e.to_string())
    }
}

fn to_mysql(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Integer(i) => mysql::Value::Int(*i),
        Value::Real(r) => mysql::Value::Double(*r),
        Value::Text(s) => mysql::Value::Bytes(s.as_bytes().to_vec()),
        Value::Blob(b) => mysql::Value::Bytes(b.clone()),
        Value::Boolean(b) => mysql::Value::Int(i64::from(*b)),
    }
}

fn from_mysql(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Int(i) => Value::Integer(i),
        mysql::Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Text(u.to_string()),
        },
        mysql::Value::Float(f) => Value::Real(f64::from(f)),
        mysql::Value::Double(d) => Value::Real(d),
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::Text(s),
            Err(e) => Value::Blob(e.into_bytes()),
        },
        other => Value::Text(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

//! PostgreSQL driver
//!
//! Client/server backend built on the synchronous `postgres` client.
//! Statements are written with `?` placeholders like every other backend and
//! rewritten to `$n` before they reach the server.

use std::any::Any;
use std::error::Error;

use bytes::BytesMut;
use postgres::error::SqlState;
use postgres::types::{FromSql, IsNull, ToSql, Type};
use postgres::{Client, NoTls, Row};
use tracing::info;

use super::driver::{Dialect, Driver, TransactionState};
use super::error::{DatabaseError, DriverError, ErrorCode};
use super::value::{ResultSet, Value};
use crate::config::Settings;

pub struct PostgresDriver {
    client: Option<Client>,
    state: TransactionState,
    schema_table: String,
}

impl PostgresDriver {
    pub fn new(settings: &Settings) -> Result<Self, DatabaseError> {
        settings.require(Dialect::Postgres.required_settings())?;

        let hostname = settings.require_str("hostname")?;
        let database = settings.require_str("database")?;

        let mut config = postgres::Config::new();
        config
            .host(hostname)
            .user(settings.require_str("username")?)
            .password(settings.require_str("password")?)
            .dbname(database);
        if let Some(port) = settings.get_parsed::<u16>("port")? {
            config.port(port);
        }

        let client = config.connect(NoTls).map_err(|e| {
            DatabaseError::Config(format!(
                "failed to connect to PostgreSQL at '{}': {}",
                hostname, e
            ))
        })?;

        info!(
            "Connected to PostgreSQL database '{}' on '{}'",
            database, hostname
        );

        Ok(PostgresDriver {
            client: Some(client),
            state: TransactionState::Idle,
            schema_table: settings
                .get("schema_table")
                .unwrap_or("schema_version")
                .to_string(),
        })
    }

    fn client(&mut self) -> Result<&mut Client, DriverError> {
        self.client.as_mut().ok_or_else(DriverError::closed)
    }

    fn exec_plain(&mut self, sql: &str) -> Result<(), DriverError> {
        self.client()?.batch_execute(sql)?;
        Ok(())
    }
}

impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, DriverError> {
        let sql = rewrite_placeholders(sql);
        let bound: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        let client = self.client()?;
        let stmt = client.prepare(&sql)?;

        if stmt.columns().is_empty() {
            let affected = client.execute(&stmt, &bound)?;
            return Ok(ResultSet::affected(affected));
        }

        let columns = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = client
            .query(&stmt, &bound)?
            .iter()
            .map(row_values)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResultSet {
            columns,
            rows,
            affected_rows: 0,
        })
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.exec_plain("BEGIN")?;
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

    // Constraints cannot be switched off per session without superuser rights
    fn enable_foreign_keys(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn disable_foreign_keys(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn is_duplicate_key_error(&self, code: &ErrorCode) -> bool {
        matches!(code, ErrorCode::Postgres(state) if state == SqlState::UNIQUE_VIOLATION.code())
    }

    fn escape(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier)
    }

    fn get_operator(&self, operator: &str) -> &'static str {
        match operator {
            "LIKE" => "LIKE",
            "ILIKE" => "ILIKE",
            _ => "",
        }
    }

    fn last_id(&mut self) -> Result<i64, DriverError> {
        let result = self.run("SELECT LASTVAL()", &[])?;
        result
            .fetch_column()
            .and_then(Value::as_i64)
            .ok_or_else(|| DriverError::other("LASTVAL() returned no value"))
    }

    fn schema_version(&mut self) -> Result<u32, DriverError> {
        let table = self.escape(&self.schema_table);
        self.exec_plain(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version INTEGER DEFAULT 0)",
            table
        ))?;

        let current = self.run(&format!("SELECT version FROM {}", table), &[])?;
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
            &format!("UPDATE {} SET version=?", table),
            &[Value::from(version)],
        )?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close() {
                tracing::warn!("Failed to close PostgreSQL connection cleanly: {}", e);
            }
            self.state = TransactionState::Idle;
            info!("Closed PostgreSQL connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<postgres::Error> for DriverError {
    fn from(e: postgres::Error) -> Self {
        let code = match e.code() {
            Some(state) => ErrorCode::Postgres(state.code().to_string()),
            None => ErrorCode::Other,
        };
        DriverError::new(code, e.to_string())
    }
}

/// Rewrite `?` placeholders to `$1..$n`, leaving quoted text untouched
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut index = 0;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                }
                _ => out.push(c),
            },
        }
    }

    out
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Boolean(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            Value::Boolean(b) => Value::Integer(i64::from(*b)).to_sql(ty, out),
            Value::Integer(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
                    Value::Real(*i as f64).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*i != 0).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    i.to_sql(ty, out)
                } else {
                    text_to_sql(&i.to_string(), ty, out)
                }
            }
            Value::Real(r) => {
                if *ty == Type::FLOAT4 {
                    (*r as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    r.to_sql(ty, out)
                } else {
                    text_to_sql(&r.to_string(), ty, out)
                }
            }
            Value::Text(s) => {
                if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
                    Value::Integer(s.trim().parse()?).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
                    Value::Real(s.trim().parse()?).to_sql(ty, out)
                } else if *ty == Type::BYTEA {
                    s.as_bytes().to_sql(ty, out)
                } else {
                    text_to_sql(s, ty, out)
                }
            }
            Value::Blob(b) => {
                if <&[u8] as ToSql>::accepts(ty) {
                    b.as_slice().to_sql(ty, out)
                } else {
                    Err(unsupported_type("bind a blob to", ty).into())
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

/// Bind text to a text-like parameter; other types need an explicit cast
fn text_to_sql(
    s: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    if <&str as ToSql>::accepts(ty) {
        s.to_sql(ty, out)
    } else {
        Err(unsupported_type("bind a value to", ty).into())
    }
}

fn unsupported_type(action: &str, ty: &Type) -> DriverError {
    DriverError::other(format!(
        "cannot {} PostgreSQL type '{}'; cast it to text in the query",
        action,
        ty.name()
    ))
}

/// How a result column is decoded into a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bytea,
    Text,
}

fn column_kind(ty: &Type) -> Result<ColumnKind, DriverError> {
    let kind = if *ty == Type::BOOL {
        ColumnKind::Bool
    } else if *ty == Type::INT2 {
        ColumnKind::Int2
    } else if *ty == Type::INT4 {
        ColumnKind::Int4
    } else if *ty == Type::INT8 {
        ColumnKind::Int8
    } else if *ty == Type::FLOAT4 {
        ColumnKind::Float4
    } else if *ty == Type::FLOAT8 {
        ColumnKind::Float8
    } else if *ty == Type::BYTEA {
        ColumnKind::Bytea
    } else if <String as FromSql>::accepts(ty) {
        ColumnKind::Text
    } else {
        return Err(unsupported_type("read a column of", ty));
    };
    Ok(kind)
}

fn row_values(row: &Row) -> Result<Vec<Value>, DriverError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column_kind(column.type_())? {
            ColumnKind::Bool => row.try_get::<_, Option<bool>>(idx)?.map(Value::Boolean),
            ColumnKind::Int2 => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| Value::Integer(i64::from(v))),
            ColumnKind::Int4 => row
                .try_get::<_, Option<i32>>(idx)?
                .map(|v| Value::Integer(i64::from(v))),
            ColumnKind::Int8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer),
            ColumnKind::Float4 => row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| Value::Real(f64::from(v))),
            ColumnKind::Float8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Real),
            ColumnKind::Bytea => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Blob),
            ColumnKind::Text => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

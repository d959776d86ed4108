//! Row-level helper for one table

use crate::database::core::{DatabaseError, QueryOutcome, ResultSet, Value};
use crate::database::Database;

/// Simple CRUD operations against a single table
pub struct Table<'a> {
    db: &'a mut Database,
    name: String,
}

impl<'a> Table<'a> {
    pub fn new(db: &'a mut Database, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert one row, returning the generated id
    pub fn insert(&mut self, columns: &[(&str, Value)]) -> Result<QueryOutcome<i64>, DatabaseError> {
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let values: Vec<Value> = columns.iter().map(|(_, value)| value.clone()).collect();

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.escaped_name())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.escaped_name(),
                self.db.escape_identifier_list(&names, None).join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };

        match self.db.execute(&sql, &values)? {
            QueryOutcome::Completed(_) => Ok(QueryOutcome::Completed(self.db.last_id()?)),
            QueryOutcome::DuplicateKey => Ok(QueryOutcome::DuplicateKey),
        }
    }

    pub fn count(&mut self) -> Result<u64, DatabaseError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.escaped_name());
        let count = self
            .select(&sql, &[])?
            .fetch_column()
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub fn all(&mut self) -> Result<ResultSet, DatabaseError> {
        let sql = format!("SELECT * FROM {}", self.escaped_name());
        self.select(&sql, &[])
    }

    /// Delete rows where `column` equals `value`, returning how many went
    pub fn remove(&mut self, column: &str, value: impl Into<Value>) -> Result<u64, DatabaseError> {
        let sql = format!(
            "DELETE FROM {} WHERE {}=?",
            self.escaped_name(),
            self.db.escape_identifier(column, None)
        );
        Ok(self.select(&sql, &[value.into()])?.affected_rows)
    }

    /// Rows matching `column <operator> value`
    ///
    /// `LIKE` and `ILIKE` are translated to the dialect's spelling; any other
    /// operator is used as given.
    pub fn search(
        &mut self,
        column: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<ResultSet, DatabaseError> {
        let translated = match self.db.operator(operator) {
            "" => operator.to_string(),
            token => token.to_string(),
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {} {} ?",
            self.escaped_name(),
            self.db.escape_identifier(column, None),
            translated
        );
        self.select(&sql, &[value.into()])
    }

    fn escaped_name(&self) -> String {
        self.db.escape_identifier(&self.name, None)
    }

    fn select(&mut self, sql: &str, values: &[Value]) -> Result<ResultSet, DatabaseError> {
        Ok(self.db.execute(sql, values)?.completed().unwrap_or_default())
    }
}

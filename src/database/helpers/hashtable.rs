//! Key/value store over a two-column table

use std::collections::BTreeMap;

use crate::database::core::{DatabaseError, Value};
use crate::database::Database;

pub struct Hashtable<'a> {
    db: &'a mut Database,
    table: String,
    key_column: String,
    value_column: String,
}

impl<'a> Hashtable<'a> {
    pub fn new(db: &'a mut Database, table: &str) -> Self {
        Self {
            db,
            table: table.to_string(),
            key_column: "key".to_string(),
            value_column: "value".to_string(),
        }
    }

    /// Use other column names than `key` and `value`
    pub fn with_columns(mut self, key_column: &str, value_column: &str) -> Self {
        self.key_column = key_column.to_string();
        self.value_column = value_column.to_string();
        self
    }

    /// Store every entry, all or nothing
    pub fn put<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> bool
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let entries: Vec<(String, Value)> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.db
            .upsert(&self.table, &self.key_column, &self.value_column, &entries)
    }

    pub fn get_all(&mut self) -> Result<BTreeMap<String, Value>, DatabaseError> {
        let sql = format!(
            "SELECT {}, {} FROM {}",
            self.db.escape_identifier(&self.key_column, None),
            self.db.escape_identifier(&self.value_column, None),
            self.db.escape_identifier(&self.table, None)
        );
        self.fetch(&sql, &[])
    }

    /// Values of the requested keys; absent keys are left out
    pub fn get(&mut self, keys: &[&str]) -> Result<BTreeMap<String, Value>, DatabaseError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} IN ({})",
            self.db.escape_identifier(&self.key_column, None),
            self.db.escape_identifier(&self.value_column, None),
            self.db.escape_identifier(&self.table, None),
            self.db.escape_identifier(&self.key_column, None),
            vec!["?"; keys.len()].join(", ")
        );
        let values: Vec<Value> = keys.iter().map(|k| Value::from(*k)).collect();
        self.fetch(&sql, &values)
    }

    fn fetch(
        &mut self,
        sql: &str,
        values: &[Value],
    ) -> Result<BTreeMap<String, Value>, DatabaseError> {
        let result = self.db.execute(sql, values)?.completed().unwrap_or_default();
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| {
                let mut row = row.into_iter();
                let key = row.next()?.to_string();
                Some((key, row.next().unwrap_or(Value::Null)))
            })
            .collect())
    }
}

pub mod config;
pub mod exec;
pub mod info;
pub mod upsert;
pub mod version;

use anyhow::{anyhow, Result};
use polydb::{Database, PolyConfig, ResultSet, Value};
use tabled::builder::Builder;
use tabled::settings::Style;

/// Open the database described by the loaded configuration
pub(crate) fn open_database(config: &PolyConfig) -> Result<Database> {
    Database::new(&config.settings).map_err(|e| anyhow!("Failed to open database: {}", e))
}

/// Interpret a command-line argument as a bound parameter
///
/// Integers and reals are bound as numbers, `null` as NULL, anything else as text.
pub(crate) fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else {
        Value::Text(raw.to_string())
    }
}

pub(crate) fn result_set_to_string(result: &ResultSet, json: bool, pretty: bool) -> Result<String> {
    if json {
        let rows = result.rows_as_maps();
        return Ok(if pretty {
            serde_json::to_string_pretty(&rows)?
        } else {
            serde_json::to_string(&rows)?
        });
    }

    let mut builder = Builder::default();
    builder.push_record(result.columns.iter().cloned());
    for row in &result.rows {
        builder.push_record(row.iter().map(|v| v.to_string()));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    Ok(table.to_string())
}

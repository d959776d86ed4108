use anyhow::Result;
use polydb::{Dialect, PolyConfig};

use super::open_database;

pub fn run(config: &PolyConfig) -> Result<()> {
    let mut db = open_database(config)?;
    let dialect = db.dialect();

    let target = match dialect {
        Dialect::Sqlite => config.settings.get("filename").unwrap_or_default().to_string(),
        Dialect::Mysql | Dialect::Postgres => format!(
            "{}@{}/{}",
            config.settings.get("username").unwrap_or_default(),
            config.settings.get("hostname").unwrap_or_default(),
            config.settings.get("database").unwrap_or_default()
        ),
    };

    println!("Driver:         {}", dialect);
    println!("Target:         {}", target);
    println!("Schema version: {}", db.schema_version()?);
    Ok(())
}

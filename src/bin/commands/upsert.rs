use anyhow::{anyhow, Result};
use clap::Args;
use polydb::{PolyConfig, Value};

use super::{open_database, parse_value};

/// Arguments for the Upsert command
#[derive(Args)]
pub struct UpsertArgs {
    /// Target table
    pub table: String,

    /// Key column
    pub key_column: String,

    /// Value column
    pub value_column: String,

    /// Entries as key=value pairs
    #[clap(required = true)]
    pub entries: Vec<String>,
}

fn parse_entries(raw: &[String]) -> Result<Vec<(String, Value)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), parse_value(v)))
                .ok_or_else(|| anyhow!("expected key=value, got '{}'", entry))
        })
        .collect()
}

pub fn run(config: &PolyConfig, args: UpsertArgs) -> Result<()> {
    let entries = parse_entries(&args.entries)?;

    let mut db = open_database(config)?;
    let written = db
        .hashtable(&args.table)
        .with_columns(&args.key_column, &args.value_column)
        .put(entries);

    if !written {
        return Err(anyhow!(
            "upsert into '{}' failed, no rows were changed",
            args.table
        ));
    }
    println!("{} entr(y/ies) written", args.entries.len());
    Ok(())
}

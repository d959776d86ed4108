use anyhow::Result;
use clap::Args;
use polydb::{PolyConfig, QueryOutcome};

use super::{open_database, parse_value, result_set_to_string};

/// Arguments for the Exec command
#[derive(Args)]
pub struct ExecArgs {
    /// SQL statement, with `?` placeholders
    pub sql: String,

    /// Values bound to the placeholders, in order
    pub params: Vec<String>,
}

/// Arguments for the Query command
#[derive(Args)]
pub struct QueryArgs {
    /// SQL query, with `?` placeholders
    pub sql: String,

    /// Values bound to the placeholders, in order
    pub params: Vec<String>,

    /// Output as JSON objects
    #[clap(long)]
    pub json: bool,

    /// Pretty-print JSON output
    #[clap(long)]
    pub pretty: bool,
}

pub fn run_exec(config: &PolyConfig, args: ExecArgs) -> Result<()> {
    let ExecArgs { sql, params } = args;
    let params: Vec<_> = params.iter().map(|p| parse_value(p)).collect();

    let mut db = open_database(config)?;
    match db.execute(&sql, &params)? {
        QueryOutcome::Completed(result) => {
            println!("{} row(s) affected", result.affected_rows);
        }
        QueryOutcome::DuplicateKey => {
            println!("duplicate key, nothing written");
        }
    }
    Ok(())
}

pub fn run_query(config: &PolyConfig, args: QueryArgs) -> Result<()> {
    let QueryArgs {
        sql,
        params,
        json,
        pretty,
    } = args;
    let params: Vec<_> = params.iter().map(|p| parse_value(p)).collect();

    let mut db = open_database(config)?;
    let result = db.execute(&sql, &params)?.completed().unwrap_or_default();
    println!("{}", result_set_to_string(&result, json || pretty, pretty)?);
    Ok(())
}

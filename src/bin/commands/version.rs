use anyhow::Result;
use clap::Args;
use polydb::PolyConfig;

use super::open_database;

/// Arguments for the Version command
#[derive(Args)]
pub struct VersionArgs {
    /// Store this schema version instead of printing the current one
    #[clap(long)]
    pub set: Option<u32>,
}

pub fn run(config: &PolyConfig, args: VersionArgs) -> Result<()> {
    let mut db = open_database(config)?;
    let mut schema = db.schema();

    if let Some(version) = args.set {
        let previous = schema.version()?;
        schema.set_version(version)?;
        println!("schema version {} -> {}", previous, version);
    } else {
        println!("{}", schema.version()?);
    }
    Ok(())
}

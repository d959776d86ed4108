use anyhow::Result;
use clap::Args;
use polydb::PolyConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    settings: BTreeMap<String, String>,
}

pub fn run(config: &PolyConfig, args: ConfigArgs) -> Result<()> {
    if args.json {
        let info = ConfigInfo {
            config_file: PolyConfig::config_file_path(),
            data_dir: config.data_dir.clone(),
            settings: config.settings.masked(),
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Config File:        {}", PolyConfig::config_file_path());
    println!("{}", config.summary());
    Ok(())
}

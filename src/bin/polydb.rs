use clap::{Parser, Subcommand};
use polydb::PolyConfig;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::config::ConfigArgs;
use commands::exec::{ExecArgs, QueryArgs};
use commands::upsert::UpsertArgs;
use commands::version::VersionArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.polydb/polydb.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active driver, connection target and schema version
    Info,

    /// Execute one statement and report affected rows
    Exec(ExecArgs),

    /// Run a query and print its rows
    Query(QueryArgs),

    /// Read or set the stored schema version
    Version(VersionArgs),

    /// Insert or overwrite key/value pairs in a two-column table
    Upsert(UpsertArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match PolyConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Info => commands::info::run(&config),
        Commands::Exec(args) => commands::exec::run_exec(&config, args),
        Commands::Query(args) => commands::exec::run_query(&config, args),
        Commands::Version(args) => commands::version::run(&config, args),
        Commands::Upsert(args) => commands::upsert::run(&config, args),
        Commands::Config(args) => commands::config::run(&config, args),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

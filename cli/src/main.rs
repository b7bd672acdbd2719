use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use couch_core::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "couchctl")]
#[command(about = "Dump databases to JSON files or restore them")]
#[command(group(ArgGroup::new("mode").required(true).args(["dump", "restore"])))]
struct Cli {
    /// Server URL; credentials may be given as user:password@host
    #[arg(short, long, default_value = "http://localhost:5984")]
    url: String,

    /// Dump each database to <dir>/<db>.json
    #[arg(short, long)]
    dump: bool,

    /// Drop and recreate each database from <dir>/<db>.json
    #[arg(short, long)]
    restore: bool,

    /// Directory holding the JSON files
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Database names
    dbs: Vec<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url)?;

    let mut failed = 0;
    for db_name in &cli.dbs {
        let outcome = if cli.dump {
            couchctl::dump(&client, db_name, &cli.dir)
                .map(|path| info!(db = %db_name, path = %path.display(), "dumped"))
        } else {
            couchctl::restore(&client, db_name, &cli.dir).map(|docs| info!(db = %db_name, docs, "restored"))
        };
        if let Err(err) = outcome {
            error!(db = %db_name, "{err:#}");
            failed += 1;
        }
    }

    if failed > 0 {
        error!(failed, total = cli.dbs.len(), "some databases failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

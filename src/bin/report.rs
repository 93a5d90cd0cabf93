//! Print read-only warehouse summaries: collection counts, best sellers and
//! revenue.

use anyhow::Context;
use clap::Parser;
use rustdw::reporting::WarehouseReport;
use rustdw::storage::LocalStore;
use rustdw::{logging, panic_handler, Config};

#[derive(Parser)]
#[command(name = "rustdw-report")]
#[command(about = "Summarize the warehouse collections")]
struct Cli {
    /// Number of best sellers to list
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Configuration file (defaults to config/rustdw.toml when present)
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    panic_handler::install_panic_hook("report");

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let store = LocalStore::from_config(&config.store);
    let report = WarehouseReport::build(&store, cli.top)
        .await
        .context("failed to read the warehouse")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

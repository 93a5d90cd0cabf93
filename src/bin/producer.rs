//! Extract one entity from the source system and publish it to its queue.
//!
//! Prints a one-line summary on stdout; the orchestrator's child-process
//! launcher surfaces that line in the step report. Exits non-zero when the
//! source or the queue cannot be reached.

use anyhow::Context;
use clap::Parser;
use rustdw::pipeline::Producer;
use rustdw::queue::LocalQueue;
use rustdw::source::JsonFileSource;
use rustdw::storage::LocalStore;
use rustdw::types::{EntityKind, RunMode};
use rustdw::{logging, panic_handler, Config};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rustdw-producer")]
#[command(about = "Publish source records of one entity to its durable queue")]
struct Cli {
    /// Entity to extract
    #[arg(long, value_enum)]
    entity: EntityKind,

    /// Full scan or changes since the last successful run
    #[arg(long, value_enum, default_value_t = RunMode::Full)]
    mode: RunMode,

    /// Configuration file (defaults to config/rustdw.toml when present)
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    panic_handler::install_panic_hook(&format!("producer:{}", cli.entity));

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let source = Arc::new(JsonFileSource::from_config(&config.source));
    let queue = Arc::new(LocalQueue::from_config(&config.queue));
    let store = Arc::new(LocalStore::from_config(&config.store));

    let report = Producer::new(cli.entity, source, queue, store)
        .extract(cli.mode)
        .await
        .with_context(|| format!("producer for {} failed", cli.entity))?;

    println!(
        "published {} {} records ({})",
        report.published, report.entity, report.effective_mode
    );
    Ok(())
}

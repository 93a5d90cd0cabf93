//! Run the pipeline: every producer, the settle wait, then transform/load.
//!
//! Consumers are expected to be running already (`rustdw-consumer`). Exits
//! 0 only when every step succeeded.

use anyhow::Context;
use clap::Parser;
use rustdw::config::LauncherKind;
use rustdw::metrics::PipelineMetrics;
use rustdw::pipeline::{
    ChildProcessLauncher, InProcessLauncher, Orchestrator, ProducerLauncher, TransformContext,
};
use rustdw::queue::LocalQueue;
use rustdw::source::JsonFileSource;
use rustdw::storage::LocalStore;
use rustdw::types::RunMode;
use rustdw::{logging, panic_handler, Config};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rustdw-run")]
#[command(about = "Extract, settle, transform and load in one run")]
struct Cli {
    #[arg(long, value_enum, default_value_t = RunMode::Full)]
    mode: RunMode,

    /// Configuration file (defaults to config/rustdw.toml when present)
    #[arg(long)]
    config: Option<String>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    panic_handler::install_panic_hook("orchestrator");

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let metrics = PipelineMetrics::new().context("failed to register metrics")?;
    let queue = Arc::new(LocalQueue::from_config(&config.queue));
    let store = Arc::new(LocalStore::from_config(&config.store));

    let launcher: Arc<dyn ProducerLauncher> = match config.orchestrator.launcher {
        LauncherKind::InProcess => Arc::new(
            InProcessLauncher::new(
                Arc::new(JsonFileSource::from_config(&config.source)),
                queue.clone(),
                store.clone(),
            )
            .with_metrics(metrics.clone()),
        ),
        LauncherKind::ChildProcess => {
            let mut launcher =
                ChildProcessLauncher::new(config.orchestrator.producer_binary.clone());
            if let Some(path) = &cli.config {
                launcher = launcher.with_config_path(PathBuf::from(path));
            }
            Arc::new(launcher)
        }
    };

    let context = TransformContext::load(&config.mapping.path);
    let orchestrator = Orchestrator::new(
        launcher,
        queue,
        store,
        context,
        config.orchestrator.clone(),
    )
    .with_metrics(metrics.clone());

    let report = orchestrator.run(cli.mode).await;
    print!("{}", report.render());
    if cli.metrics {
        print!("{}", metrics.gather_text()?);
    }
    std::process::exit(report.exit_code());
}

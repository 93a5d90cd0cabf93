//! Stage records from one or more entity queues until Ctrl+C, or until the
//! queues are empty with `--drain`.

use anyhow::Context;
use clap::Parser;
use rustdw::metrics::PipelineMetrics;
use rustdw::pipeline::{ConsumeStats, StagingConsumer};
use rustdw::queue::LocalQueue;
use rustdw::storage::LocalStore;
use rustdw::types::EntityKind;
use rustdw::{logging, panic_handler, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rustdw-consumer")]
#[command(about = "Validate and stage records from the entity queues")]
struct Cli {
    /// Entity queue to consume; repeat for several (default: from config)
    #[arg(long = "entity", value_enum)]
    entities: Vec<EntityKind>,

    /// Stop once every queue is empty instead of running until Ctrl+C
    #[arg(long)]
    drain: bool,

    /// Print Prometheus metrics once the consumers stop
    #[arg(long)]
    metrics: bool,

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
    panic_handler::install_panic_hook("consumer");

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let entities = if cli.entities.is_empty() {
        config.consumer.entities.clone()
    } else {
        cli.entities.clone()
    };
    let queue = Arc::new(LocalQueue::from_config(&config.queue));
    let store = Arc::new(LocalStore::from_config(&config.store));
    let receive_timeout = Duration::from_millis(config.consumer.receive_timeout_ms);
    let metrics = PipelineMetrics::new().context("failed to register metrics")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    for entity in entities {
        let consumer = StagingConsumer::new(entity, queue.clone(), store.clone())
            .with_receive_timeout(receive_timeout)
            .with_metrics(metrics.clone());
        let shutdown = shutdown_rx.clone();
        let drain = cli.drain;
        tasks.spawn(async move {
            let result = if drain {
                consumer.drain().await
            } else {
                consumer.run(shutdown).await
            };
            (entity, result)
        });
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (Ctrl+C)");
            let _ = signal_tx.send(true);
        }
    });

    let mut total = ConsumeStats::default();
    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(stats))) => total.merge(stats),
            Ok((entity, Err(e))) => {
                error!(entity = %entity, error = %e, hint = e.remediation_hint(), "Consumer failed");
                failed = true;
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Consumer task aborted");
                failed = true;
                let _ = shutdown_tx.send(true);
            }
        }
    }

    println!(
        "received {} staged {} rejected {}",
        total.received, total.staged, total.rejected
    );
    if cli.metrics {
        print!("{}", metrics.gather_text()?);
    }
    if failed {
        anyhow::bail!("one or more consumers stopped on a store or queue failure");
    }
    Ok(())
}

mod cli;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use jobrunner::config::EngineConfig;
use jobrunner::dispatch::ChannelSink;
use jobrunner::manager::JobManager;
use jobrunner::service::{self, load_spec_file, parse_trigger_line};
use jobrunner::store::{MemoryStore, RunStore};
use jobrunner::ui::RunPrinter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    init_tracing(&config, cli.verbose);

    match cli.command {
        Command::Serve { specs } => serve(config, specs).await,
        Command::Demo => demo::run_demo(&config),
    }
}

fn init_tracing(config: &EngineConfig, verbose: bool) {
    let filter = if verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone())
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

async fn serve(config: EngineConfig, specs: Option<PathBuf>) -> Result<()> {
    let store = MemoryStore::new();
    if let Some(path) = specs {
        for spec in load_spec_file(&path)? {
            info!(job = %spec.id, tasks = spec.tasks.len(), "loaded job spec");
            println!("job {}", spec.id.as_uuid());
            store.create_spec(spec)?;
        }
    }

    let (sink, mut handoffs) = ChannelSink::new();
    let manager = Arc::new(JobManager::new(store, sink, &config));
    let (trigger_tx, trigger_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let printer = RunPrinter::new();
        while let Some(handoff) = handoffs.recv().await {
            printer.print_handoff(&handoff);
        }
    });

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_trigger_line(&line) {
                Ok(Some(trigger)) => {
                    if trigger_tx.send(trigger).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "skipping trigger line"),
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let stats = service::run(manager, trigger_rx, shutdown_rx).await;
    reader.abort();
    info!(handled = stats.handled, rejected = stats.rejected, "job manager service stopped");
    Ok(())
}

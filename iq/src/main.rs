//! iq - inspect request scheduler
//!
//! CLI entry point for inspecting configuration, decoding links and running
//! links through a simulated worker pool.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use inspectq::cli::{Cli, Command, get_log_path};
use inspectq::config::Config;
use inspectq::inspector::Inspector;
use inspectq::link::InspectLink;
use inspectq::queue::Queue;
use inspectq::store::MemoryStore;
use inspectq::worker::{SessionWorker, SimulatedBackend};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Parse { link } => cmd_parse(&link),
        Command::Simulate {
            workers,
            latency_ms,
            failure_rate,
            links,
        } => cmd_simulate(&config, workers, latency_ms, failure_rate, &links).await,
    }
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

/// Decode one inspect link
fn cmd_parse(link: &str) -> Result<()> {
    debug!(%link, "cmd_parse: called");
    let link = InspectLink::parse(link)?;
    println!("{}", serde_json::to_string_pretty(&link)?);
    Ok(())
}

/// Resolve links through a simulated pool
async fn cmd_simulate(config: &Config, workers: usize, latency_ms: u64, failure_rate: f64, links: &[String]) -> Result<()> {
    debug!(workers, latency_ms, failure_rate, count = links.len(), "cmd_simulate: called");
    if workers == 0 {
        eprintln!("Warning: no workers, every link will expire after {:?}", config.queue.expiry());
    }

    let (handle, task) = Queue::spawn(config.queue.clone());

    let backend = SimulatedBackend::new(Duration::from_millis(latency_ms)).with_failure_rate(failure_rate);
    for i in 0..workers {
        let worker = SessionWorker::new(format!("sim-{}", i), backend.clone(), config.worker.clone());
        handle
            .register_worker(Arc::new(worker))
            .await
            .context("Failed to register worker")?;
    }

    let inspector = Inspector::new(handle.clone(), MemoryStore::new());
    let results = inspector.inspect_many(links).await.context("Failed to inspect links")?;

    let metrics = handle.metrics().await?;
    info!(?metrics, "cmd_simulate: finished");

    handle.shutdown().await?;
    task.await.context("Queue task failed")?;

    let ordered: BTreeMap<String, _> = results.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&ordered)?);
    Ok(())
}

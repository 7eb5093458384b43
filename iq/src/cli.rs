//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// inspectq - single-flight inspect request scheduler
#[derive(Debug, Parser)]
#[command(
    name = "iq",
    about = "Dispatch inspect requests across a pool of single-flight workers",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the effective configuration as YAML
    Config,

    /// Run links through a pool of in-process simulated workers
    Simulate {
        /// Number of workers in the pool
        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        /// Simulated response latency per request
        #[arg(long = "latency-ms", default_value_t = 50)]
        latency_ms: u64,

        /// Fraction of requests that fail (0.0 - 1.0)
        #[arg(long = "failure-rate", default_value_t = 0.0)]
        failure_rate: f64,

        /// Inspect links to resolve
        #[arg(value_name = "LINK", required = true)]
        links: Vec<String>,
    },

    /// Decode an inspect link and print its parts as JSON
    Parse {
        /// Inspect link to decode
        #[arg(value_name = "LINK")]
        link: String,
    },
}

/// Where the log file is written
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inspectq")
        .join("logs")
        .join("inspectq.log");
    debug!(?path, "get_log_path: returning path");
    path
}

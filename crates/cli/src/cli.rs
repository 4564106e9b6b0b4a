//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Quota Dispatch - rate-limit-aware API request dispatcher
#[derive(Parser, Debug)]
#[command(
    name = "quota-dispatch",
    author,
    version,
    about = "Rate-limit-aware API request dispatcher",
    long_about = "Dispatches requests to a quota-limited API across a pool of credentials.\n\n\
                  Answers from a response cache when possible, rejects duplicate requests,\n\
                  queues by priority with bounded concurrency and retries transient failures."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "QUOTA_DISPATCH_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "QUOTA_DISPATCH_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workload simulation against the in-process mock API
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "dispatch.toml",
        env = "QUOTA_DISPATCH_CONFIG"
    )]
    pub config: PathBuf,

    /// Number of submissions to generate (0 = until interrupted)
    #[arg(short = 'n', long, default_value = "500", env = "QUOTA_DISPATCH_REQUESTS")]
    pub requests: u64,

    /// Submissions per second
    #[arg(long, default_value = "50")]
    pub rate: f64,

    /// Distinct endpoints the workload cycles through
    #[arg(long, default_value = "20")]
    pub endpoints: usize,

    /// Share of submissions sent as POST (never cached)
    #[arg(long, default_value = "0.1")]
    pub post_ratio: f64,

    /// Mock API: probability of a 503 answer
    #[arg(long, default_value = "0.05")]
    pub failure_rate: f64,

    /// Mock API: latency per call in milliseconds
    #[arg(long, default_value = "20")]
    pub latency_ms: u64,

    /// Mock API: calls allowed per credential per window
    #[arg(long, default_value = "5000")]
    pub quota: u64,

    /// Seed for the workload and the mock API
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Simulation timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "QUOTA_DISPATCH_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9464", env = "QUOTA_DISPATCH_METRICS_PORT")]
    pub metrics_port: u16,

    /// Print the final dispatcher status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show credential details
    #[arg(long)]
    pub credentials: bool,

    /// Show notification channel configuration
    #[arg(long)]
    pub channels: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

//! CLI argument definitions for ohlcvq.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `serve` | Run the hourly scheduler and the health endpoint |
//! | `run-once` | Run a single ingestion tick now |
//! | `params` | Manage per-instrument fetch parameters |
//! | `bars` | Show the most recent stored bars |
//!
//! Settings not given on the command line come from the environment
//! (`OHLCVQ_DB_PATH`, `LOGGING_URL`, `OHLCVQ_PORT`, ...).
//!
//! # Examples
//!
//! ```bash
//! ohlcvq params set BTC-USD --api-key "$COINDESK_KEY" --limit 1000
//! ohlcvq run-once --pretty
//! ohlcvq bars BTC-USD --limit 5
//! ohlcvq serve --port 8000
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Scheduled OHLCV ingestion into DuckDB
#[derive(Debug, Parser)]
#[command(name = "ohlcvq", author, version, about = "Scheduled OHLCV ingestion into DuckDB")]
pub struct Cli {
    /// DuckDB file to use instead of `OHLCVQ_DB_PATH`.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the hourly scheduler with a health endpoint until Ctrl+C.
    Serve(ServeArgs),
    /// Run one ingestion tick immediately and print its report.
    RunOnce(RunOnceArgs),
    /// Manage fetch parameters.
    #[command(subcommand)]
    Params(ParamsCommand),
    /// Print the most recent stored bars for an instrument.
    Bars(BarsArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address for the health endpoint.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port for the health endpoint.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log collector URL for diagnostics.
    #[arg(long)]
    pub logging_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunOnceArgs {
    /// Pretend the tick started at this RFC3339 UTC instant.
    #[arg(long)]
    pub at: Option<String>,

    /// Skip the pacing delay between instruments.
    #[arg(long, default_value_t = false)]
    pub no_pacing: bool,
}

#[derive(Debug, Subcommand)]
pub enum ParamsCommand {
    /// Create or replace the parameter row for an instrument.
    Set(ParamsSetArgs),
    /// List parameter rows with API keys masked.
    List,
    /// Delete the parameter row for an instrument.
    Remove(ParamsRemoveArgs),
}

#[derive(Debug, Args)]
pub struct ParamsSetArgs {
    /// Instrument identifier, e.g. BTC-USD.
    pub instrument: String,

    /// Provider API key used for this instrument.
    #[arg(long)]
    pub api_key: String,

    /// Bar granularity.
    #[arg(long, default_value = "MINUTE")]
    pub unit: String,

    /// Bars requested per tick.
    #[arg(long, default_value_t = 1000)]
    pub limit: i64,
}

#[derive(Debug, Args)]
pub struct ParamsRemoveArgs {
    pub instrument: String,

    #[arg(long, default_value = "MINUTE")]
    pub unit: String,
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    pub instrument: String,

    #[arg(long, default_value = "MINUTE")]
    pub unit: String,

    /// Number of bars to show, newest first.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

//! CLI argument definitions for tickwatch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Run the refresh and alert engine until Ctrl-C |
//! | `refresh` | Run one refresh cycle |
//! | `quote` | Print the current snapshot of one instrument |
//! | `instrument` | Register and list instruments |
//! | `subscriber` | Register subscribers |
//! | `tracker` | Manage price trackers |
//! | `evaluate` | Run one alert evaluation for a subscriber |
//!
//! # Global Options
//!
//! | Option | Env | Description |
//! |--------|-----|-------------|
//! | `--config` | `TICKWATCH_CONFIG` | JSON engine config |
//! | `--home` | `TICKWATCH_HOME` | Data directory |
//! | `--db` | `TICKWATCH_DB` | DuckDB file, overrides `--home` |
//! | `--log-level` | `TICKWATCH_LOG` | Tracing filter directive |
//! | `--pretty` | | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! tickwatch instrument add NABIL NABIL --name "Nabil Bank"
//! tickwatch subscriber add 1001 asha
//! tickwatch tracker add 1001 NABIL 1200 --tolerance 1
//! tickwatch refresh --force --pretty
//! tickwatch run
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Market data refresh and price alert engine
#[derive(Debug, Parser)]
#[command(
    name = "tickwatch",
    author,
    version,
    about = "Market data refresh and price alert engine",
    long_about = "tickwatch keeps a store of instrument snapshots fresh during trading hours \
and alerts subscribers when a price reaches their target.\n\
\n\
Use 'tickwatch <command> --help' for command-specific help."
)]
pub struct Cli {
    /// JSON file with engine tuning; missing keys keep their defaults.
    #[arg(long, global = true, env = "TICKWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the DuckDB database.
    #[arg(long, global = true, env = "TICKWATCH_HOME")]
    pub home: Option<PathBuf>,

    /// Explicit database file path.
    #[arg(long, global = true, env = "TICKWATCH_DB")]
    pub db: Option<PathBuf>,

    /// Tracing filter, e.g. `debug` or `info,tickwatch_core=trace`.
    ///
    /// `RUST_LOG` is used when this is not set.
    #[arg(long, global = true, env = "TICKWATCH_LOG")]
    pub log_level: Option<String>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(flatten)]
    pub upstream: UpstreamArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the fetch adapter and notifier.
#[derive(Debug, Args)]
pub struct UpstreamArgs {
    /// Field-map endpoint; instruments are fetched from `{url}/{locator}`.
    #[arg(long, global = true, env = "TICKWATCH_FETCH_URL")]
    pub fetch_url: Option<String>,

    /// Bearer token sent to the field-map endpoint.
    #[arg(long, global = true, env = "TICKWATCH_FETCH_TOKEN", hide_env_values = true)]
    pub fetch_token: Option<String>,

    /// Maximum concurrent fetches.
    #[arg(long, global = true, env = "TICKWATCH_FETCH_CONCURRENCY")]
    pub fetch_concurrency: Option<usize>,

    /// Telegram bot token; alerts are only logged when absent.
    #[arg(long, global = true, env = "TICKWATCH_TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the refresh ticker and per-subscriber alert jobs until Ctrl-C.
    Run,

    /// Run one refresh cycle and print its report.
    ///
    /// # Examples
    ///
    ///   tickwatch refresh
    ///   tickwatch refresh --all --force
    Refresh(RefreshArgs),

    /// Print the current snapshot of an instrument, refreshing it if stale.
    Quote(QuoteArgs),

    /// Instrument registration.
    Instrument(InstrumentArgs),

    /// Subscriber registration.
    Subscriber(SubscriberArgs),

    /// Tracker management.
    Tracker(TrackerArgs),

    /// Evaluate every tracker of one subscriber now.
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Refresh every registered instrument, tracked or not.
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Ignore freshness and the trading calendar.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// Instrument ticker (e.g. NABIL).
    pub ticker: String,
}

#[derive(Debug, Args)]
pub struct InstrumentArgs {
    #[command(subcommand)]
    pub command: InstrumentCommand,
}

#[derive(Debug, Subcommand)]
pub enum InstrumentCommand {
    /// Register an instrument; registering a known ticker is a no-op.
    Add(InstrumentAddArgs),
    /// List registered instruments.
    List,
}

#[derive(Debug, Args)]
pub struct InstrumentAddArgs {
    pub ticker: String,

    /// Upstream locator used to fetch the instrument page.
    pub locator: String,

    /// Display name; defaults to the ticker.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct SubscriberArgs {
    #[command(subcommand)]
    pub command: SubscriberCommand,
}

#[derive(Debug, Subcommand)]
pub enum SubscriberCommand {
    /// Register a subscriber by chat id.
    Add(SubscriberAddArgs),
}

#[derive(Debug, Args)]
pub struct SubscriberAddArgs {
    /// Chat id alerts are delivered to.
    pub external_id: String,
    pub name: String,
}

#[derive(Debug, Args)]
pub struct TrackerArgs {
    #[command(subcommand)]
    pub command: TrackerCommand,
}

#[derive(Debug, Subcommand)]
pub enum TrackerCommand {
    /// Create a tracker for a subscriber.
    Add(TrackerAddArgs),
    /// List the trackers of a subscriber.
    List(TrackerListArgs),
    /// Delete a tracker by id.
    Remove(TrackerRemoveArgs),
}

#[derive(Debug, Args)]
pub struct TrackerAddArgs {
    pub external_id: String,
    pub ticker: String,

    /// Target price.
    pub target: f64,

    /// Tolerance band in percent of the current price (default 0.5).
    #[arg(long)]
    pub tolerance: Option<f64>,
}

#[derive(Debug, Args)]
pub struct TrackerListArgs {
    pub external_id: String,
}

#[derive(Debug, Args)]
pub struct TrackerRemoveArgs {
    pub id: i64,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    pub external_id: String,
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "distill",
    version,
    about = "Distillation column telemetry replay tool",
    long_about = "Replay recorded distillation sessions (CSV or JSON) through the telemetry core\n\
                  and print the chart projections a monitoring front-end would render."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a recorded session to completion
    Replay(ReplayArgs),
    /// Check a transport settings file
    ValidateSettings(ValidateSettingsArgs),
    /// List supported replay speeds
    Speeds(SpeedsArgs),
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Recording file (.csv or .json)
    pub file: PathBuf,

    /// Replay speed multiplier (1, 2, 5, 10 or 15)
    #[arg(long, default_value_t = 2)]
    pub speed: u32,

    /// Recent entries kept in history besides the first one
    #[arg(long, default_value_t = distill_telemetry::DEFAULT_HISTORY_CAPACITY)]
    pub capacity: usize,

    /// Print the projections every N accepted entries (0: only at completion)
    #[arg(long, default_value_t = 0)]
    pub every: u64,

    /// Delay between entries at 1x, in milliseconds
    #[arg(long, default_value_t = 1000, env = "DISTILL_INTERVAL_MS")]
    pub interval_ms: u64,

    /// Upper bound on each backend command, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Write the replayed entries to this CSV file after completion
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// JSON output
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ValidateSettingsArgs {
    /// Settings JSON file
    pub file: PathBuf,

    /// JSON output
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct SpeedsArgs {
    /// JSON output
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

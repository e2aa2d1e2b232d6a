use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cvefix", version, about = "Harvest security-fix commits into a per-CVE source corpus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve, fetch and store fix commits for every record of a feed
    Harvest(HarvestArgs),
    /// Show persisted harvest state
    Status(StatusArgs),
    /// Convert a cvelist checkout into a JSON-lines feed
    ExtractFeed(ExtractFeedArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct HarvestArgs {
    /// Feed of records, JSON lines or a JSON array
    #[arg(short, long)]
    pub feed: PathBuf,

    /// Corpus root directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Number of records processed in parallel
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Revisit records that already reached a terminal state
    #[arg(long)]
    pub force_refresh: bool,

    /// Only harvest records disclosed in or after this year
    #[arg(long)]
    pub since: Option<i32>,

    /// YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SQLite harvest state database
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Skip files larger than this many bytes
    #[arg(long)]
    pub max_blob_bytes: Option<u64>,

    /// Do not check the code-hosting APIs before starting
    #[arg(long)]
    pub skip_preflight: bool,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    /// SQLite harvest state database
    #[arg(long, default_value = crate::cli::DEFAULT_STATE_PATH)]
    pub state: PathBuf,

    /// Show one record
    #[arg(long)]
    pub id: Option<String>,

    /// List records in this state: pending, resolved, unresolved, failed
    #[arg(long)]
    pub status: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ExtractFeedArgs {
    /// Root of a cvelist checkout
    #[arg(long)]
    pub cvelist: PathBuf,

    /// Feed file to write
    #[arg(short, long)]
    pub output: PathBuf,

    /// Keep only references on this host (repeatable)
    #[arg(long = "host")]
    pub hosts: Vec<String>,

    /// Drop records left without references
    #[arg(long)]
    pub require_references: bool,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Configuration file path
    pub config: PathBuf,
}

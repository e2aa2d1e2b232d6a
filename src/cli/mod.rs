pub mod commands;
pub mod extract_feed;
pub mod harvest;
pub mod status;

pub use commands::{Cli, Commands};

pub const DEFAULT_OUT_DIR: &str = "data";
pub const DEFAULT_STATE_PATH: &str = ".cvefix/state.db";
pub const DEFAULT_CONCURRENCY: usize = 4;

//! Harvests the files touched by security-fix commits into a corpus laid out
//! as `data/<year>/<vulnerability-id>/<file>`.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod errors;
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod state;

pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const GIT_HASH: &str = env!("GIT_HASH");

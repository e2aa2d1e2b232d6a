use clap::Parser;
use cvefix_harvest::cli::{self, Cli, Commands};
use cvefix_harvest::config;
use cvefix_harvest::errors::{Classify, HarvestError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.with_ansi(!cli.no_color).init();
    }

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        build = cvefix_harvest::BUILD_TIMESTAMP,
        commit = cvefix_harvest::GIT_HASH,
        "cvefix starting"
    );

    let result = match cli.command {
        Commands::Harvest(args) => cli::harvest::handle_harvest(args).await,
        Commands::Status(args) => cli::status::handle_status(args).await,
        Commands::ExtractFeed(args) => cli::extract_feed::handle_extract_feed(args).await,
        Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            debug!(error_type = e.classify().error_type, "Exiting on fatal error");
            std::process::exit(2);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<i32, HarvestError> {
    let config = config::parse_config(&args.config).await?;
    config.http_settings()?;
    println!("Configuration is valid: {}", args.config.display());
    Ok(0)
}

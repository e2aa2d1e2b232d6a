use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::commands::HarvestArgs;
use crate::config::credentials::redact_credentials;
use crate::config::{parse_config, HarvesterConfig};
use crate::corpus::{atomic_write, CorpusWriter};
use crate::errors::HarvestError;
use crate::feed::open_feed;
use crate::fetch::{CodeHostApi, HttpCodeHost, RateLimitedFetcher, SystemClock};
use crate::models::{ForgeKind, Provider};
use crate::pipeline::{preflight, HarvestOptions, HarvestOrchestrator, HarvestReport};
use crate::resolver::ReferenceResolver;
use crate::state::SqliteStateStore;

/// Effective run settings: CLI flags over config file values over defaults.
#[derive(Debug, Clone)]
pub struct HarvestPlan {
    pub out: PathBuf,
    pub state: PathBuf,
    pub options: HarvestOptions,
}

pub fn plan(args: &HarvestArgs, config: &HarvesterConfig) -> HarvestPlan {
    let section = config.harvest.clone().unwrap_or_default();
    let defaults = HarvestOptions::default();
    HarvestPlan {
        out: args.out.clone().or(section.out).unwrap_or_else(|| PathBuf::from(super::DEFAULT_OUT_DIR)),
        state: args.state.clone().or(section.state).unwrap_or_else(|| PathBuf::from(super::DEFAULT_STATE_PATH)),
        options: HarvestOptions {
            concurrency: args.concurrency.or(section.concurrency).unwrap_or(super::DEFAULT_CONCURRENCY).max(1),
            force_refresh: args.force_refresh,
            since: args.since.or(section.since),
            max_blob_bytes: args.max_blob_bytes.or(section.max_blob_bytes).unwrap_or(defaults.max_blob_bytes),
        },
    }
}

/// The output root must be a directory we can create files in.
async fn prepare_output_dir(out: &Path) -> Result<(), HarvestError> {
    if out.exists() && !out.is_dir() {
        return Err(HarvestError::Config(format!("Output path {} is not a directory", out.display())));
    }
    tokio::fs::create_dir_all(out)
        .await
        .map_err(|e| HarvestError::Config(format!("Cannot create output directory {}: {}", out.display(), e)))?;
    let marker = out.join(format!(".cvefix-write-check-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&marker, b"")
        .await
        .map_err(|e| HarvestError::Config(format!("Output directory {} is not writable: {}", out.display(), e)))?;
    let _ = tokio::fs::remove_file(&marker).await;
    Ok(())
}

fn preflight_providers(config: &HarvesterConfig) -> Vec<Provider> {
    let mut providers = vec![
        Provider::new(ForgeKind::GitHub, "github.com"),
        Provider::new(ForgeKind::GitLab, "gitlab.com"),
    ];
    for host in config.hosts.iter().flatten() {
        let provider = Provider::new(host.kind, &host.host);
        if !providers.contains(&provider) {
            providers.push(provider);
        }
    }
    providers
}

pub fn resolver_for(config: &HarvesterConfig) -> ReferenceResolver {
    config
        .hosts
        .iter()
        .flatten()
        .fold(ReferenceResolver::new(), |r, h| r.with_host_kind(&h.host, h.kind))
}

/// Run a harvest; returns the process exit code for a completed run.
pub async fn handle_harvest(args: HarvestArgs) -> Result<i32, HarvestError> {
    let config = match &args.config {
        Some(path) => parse_config(path).await?,
        None => HarvesterConfig::default(),
    };
    let plan = plan(&args, &config);
    info!(
        feed = %args.feed.display(),
        out = %plan.out.display(),
        state = %plan.state.display(),
        concurrency = plan.options.concurrency,
        "Preparing harvest"
    );

    let feed = open_feed(&args.feed)?;
    prepare_output_dir(&plan.out).await?;

    let api: Arc<dyn CodeHostApi> = Arc::new(HttpCodeHost::new(config.http_settings()?)?);
    if args.skip_preflight {
        warn!("Skipping API preflight");
    } else {
        preflight(api.as_ref(), &preflight_providers(&config)).await?;
    }

    let clock = Arc::new(SystemClock);
    let fetcher = Arc::new(RateLimitedFetcher::new(
        api,
        clock.clone(),
        config.retry_policy(),
        config.bucket_config(),
    ));
    let state = Arc::new(SqliteStateStore::new(&plan.state)?);
    let writer = Arc::new(CorpusWriter::new(plan.out.clone(), clock.clone()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let orchestrator = HarvestOrchestrator::new(Arc::new(resolver_for(&config)), fetcher, writer, state, clock)
        .with_cancel_token(cancel);
    let report = orchestrator.run(feed, &plan.options).await?;

    let secrets = config.secrets();
    let secret_refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
    print!("{}", redact_credentials(&report.to_string(), &secret_refs));

    if let Some(path) = &args.report_json {
        write_report_json(path, &report).await?;
        info!(path = %path.display(), "Wrote run report");
    }

    Ok(if report.has_failures() { 1 } else { 0 })
}

async fn write_report_json(path: &Path, report: &HarvestReport) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut json = serde_json::to_vec_pretty(report)?;
    json.push(b'\n');
    atomic_write(path, &json).await?;
    Ok(())
}

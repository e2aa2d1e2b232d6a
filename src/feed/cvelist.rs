use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::HarvestError;
use super::year_from_id;

/// Outcome of converting a cvelist checkout into a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub files: u64,
    pub written: u64,
    pub skipped: u64,
}

/// Restricts which reference URLs make it into the feed.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Keep only URLs whose host ends with one of these; empty keeps all.
    pub hosts: Vec<String>,
    /// Drop records without any remaining reference.
    pub require_references: bool,
}

impl ConvertOptions {
    fn keeps(&self, url: &str) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        let host = match reqwest::Url::parse(url) {
            Ok(u) => u.host_str().map(|h| h.to_ascii_lowercase()),
            Err(_) => None,
        };
        host.is_some_and(|h| {
            self.hosts
                .iter()
                .any(|want| h == *want || h.ends_with(&format!(".{}", want)))
        })
    }
}

/// Id and reference URLs of one CVE JSON document (4.0 or 5.x layout).
pub fn parse_cve_document(doc: &Value) -> Option<(String, Vec<String>)> {
    if let Some(id) = doc["CVE_data_meta"]["ID"].as_str() {
        let urls = doc["references"]["reference_data"]
            .as_array()
            .map(|refs| refs.iter().filter_map(|r| r["url"].as_str().map(String::from)).collect())
            .unwrap_or_default();
        return Some((id.to_string(), urls));
    }
    if let Some(id) = doc["cveMetadata"]["cveId"].as_str() {
        let urls = doc["containers"]["cna"]["references"]
            .as_array()
            .map(|refs| refs.iter().filter_map(|r| r["url"].as_str().map(String::from)).collect())
            .unwrap_or_default();
        return Some((id.to_string(), urls));
    }
    None
}

fn cve_files(dir: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let pattern = dir.join("**").join("CVE-*.json");
    let pattern = pattern.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| HarvestError::Feed(format!("Invalid cvelist path {}: {}", dir.display(), e)))?
        .filter_map(Result::ok)
        .collect();
    files.sort();
    Ok(files)
}

/// Walk a cvelist checkout and write one JSON-lines feed record per CVE.
pub fn convert_cvelist<W: Write>(
    dir: &Path,
    out: &mut W,
    options: &ConvertOptions,
) -> Result<ConvertStats, HarvestError> {
    if !dir.is_dir() {
        return Err(HarvestError::Feed(format!("{} is not a directory", dir.display())));
    }

    let mut stats = ConvertStats::default();
    for path in cve_files(dir)? {
        stats.files += 1;
        let doc: Value = match std::fs::read(&path).map_err(|e| e.to_string()).and_then(|raw| {
            serde_json::from_slice(&raw).map_err(|e| e.to_string())
        }) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable CVE document");
                stats.skipped += 1;
                continue;
            }
        };

        let Some((id, urls)) = parse_cve_document(&doc) else {
            debug!(path = %path.display(), "No CVE id in document");
            stats.skipped += 1;
            continue;
        };
        let Some(year) = year_from_id(&id) else {
            debug!(id = %id, "CVE id carries no year");
            stats.skipped += 1;
            continue;
        };

        let references: Vec<String> = urls.into_iter().filter(|u| options.keeps(u)).collect();
        if options.require_references && references.is_empty() {
            stats.skipped += 1;
            continue;
        }

        let line = serde_json::json!({ "id": id, "year": year, "references": references });
        serde_json::to_writer(&mut *out, &line)?;
        out.write_all(b"\n")?;
        stats.written += 1;
    }

    info!(files = stats.files, written = stats.written, skipped = stats.skipped, "Converted cvelist");
    Ok(stats)
}

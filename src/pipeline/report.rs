use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::corpus::WriteReport;
use crate::fetch::ApiCallStats;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedRecord {
    pub id: String,
    pub error_kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FileCounts {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub removed: u64,
    /// Pre-fix images created or replaced under `pre/`.
    pub pre_images: u64,
    /// Files left out of the corpus (binary, oversized, unsupported).
    pub skipped: u64,
}

impl FileCounts {
    pub(crate) fn add(&mut self, write: &WriteReport, skipped: usize) {
        self.created += write.created as u64;
        self.updated += write.updated as u64;
        self.unchanged += write.unchanged as u64;
        self.removed += write.removed as u64;
        self.pre_images += write.pre_images as u64;
        self.skipped += skipped as u64;
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Records read from the feed, including duplicates.
    pub feed_records: u64,
    pub invalid_feed_records: u64,
    pub duplicates: u64,
    /// Outside the `since` year window.
    pub filtered: u64,
    /// Already terminal and not force-refreshed.
    pub skipped: u64,
    pub resolved: u64,
    pub unresolved: u64,
    pub failed: u64,
    /// Started but left Pending by cancellation.
    pub interrupted: u64,
    pub failed_records: Vec<FailedRecord>,
    pub unresolved_ids: Vec<String>,
    pub files: FileCounts,
    pub api: ApiCallStats,
    pub cancelled: bool,
}

impl HarvestReport {
    pub fn new(run_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            elapsed_ms: 0,
            feed_records: 0,
            invalid_feed_records: 0,
            duplicates: 0,
            filtered: 0,
            skipped: 0,
            resolved: 0,
            unresolved: 0,
            failed: 0,
            interrupted: 0,
            failed_records: Vec::new(),
            unresolved_ids: Vec::new(),
            files: FileCounts::default(),
            api: ApiCallStats::default(),
            cancelled: false,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub(crate) fn finish(&mut self, now: DateTime<Utc>, api: ApiCallStats) {
        self.finished_at = now;
        self.elapsed_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.api = api;
        self.failed_records.sort_by(|a, b| a.id.cmp(&b.id));
        self.unresolved_ids.sort();
    }
}

impl std::fmt::Display for HarvestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Harvest {} finished in {:.1}s{}", self.run_id, self.elapsed_ms as f64 / 1000.0,
            if self.cancelled { " (cancelled)" } else { "" })?;
        writeln!(f, "  feed:       {} records ({} invalid, {} duplicates, {} filtered)",
            self.feed_records, self.invalid_feed_records, self.duplicates, self.filtered)?;
        writeln!(f, "  resolved:   {}", self.resolved)?;
        writeln!(f, "  unresolved: {}", self.unresolved)?;
        writeln!(f, "  failed:     {}", self.failed)?;
        writeln!(f, "  skipped:    {}", self.skipped)?;
        if self.interrupted > 0 {
            writeln!(f, "  pending:    {}", self.interrupted)?;
        }
        writeln!(f, "  files:      {} created, {} updated, {} unchanged, {} removed, {} skipped ({} pre-images written)",
            self.files.created, self.files.updated, self.files.unchanged, self.files.removed, self.files.skipped,
            self.files.pre_images)?;
        writeln!(f, "  api calls:  {} ({} retries, {} throttle events)",
            self.api.total_calls, self.api.retries, self.api.throttle_events)?;
        for (host, calls) in &self.api.calls_by_host {
            writeln!(f, "    {}: {}", host, calls)?;
        }
        if !self.failed_records.is_empty() {
            writeln!(f, "Failed:")?;
            for r in &self.failed_records {
                writeln!(f, "  {} [{}] {}", r.id, r.error_kind, r.detail)?;
            }
        }
        if !self.unresolved_ids.is_empty() {
            writeln!(f, "Unresolved: {}", self.unresolved_ids.join(", "))?;
        }
        Ok(())
    }
}

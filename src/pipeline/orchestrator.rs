use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::io::BufRead;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::corpus::CorpusSink;
use crate::errors::{AttemptError, Classify, HarvestError, ResolveError};
use crate::extract::CommitDiffExtractor;
use crate::feed::{for_each_record, FeedStats};
use crate::fetch::{Clock, RateLimitedFetcher};
use crate::models::{CandidateReference, RecordStatus, VulnerabilityRecord};
use crate::resolver::ReferenceResolver;
use crate::state::{StateEntry, StateStore};
use super::report::{FailedRecord, HarvestReport};

/// Knobs for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub concurrency: usize,
    pub force_refresh: bool,
    /// Only records disclosed in or after this year.
    pub since: Option<i32>,
    pub max_blob_bytes: u64,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            force_refresh: false,
            since: None,
            max_blob_bytes: crate::extract::DEFAULT_MAX_BLOB_BYTES,
        }
    }
}

#[derive(Debug, Default)]
struct ProducerStats {
    feed: FeedStats,
    duplicates: u64,
    filtered: u64,
}

const PANIC_ERROR_KIND: &str = "Panic";

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// How one record's pipeline ended.
enum RecordOutcome {
    Skipped,
    Resolved,
    Unresolved,
    Failed,
    Interrupted,
}

pub struct HarvestOrchestrator {
    resolver: Arc<ReferenceResolver>,
    fetcher: Arc<RateLimitedFetcher>,
    writer: Arc<dyn CorpusSink>,
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    cancel_token: CancellationToken,
}

impl HarvestOrchestrator {
    pub fn new(
        resolver: Arc<ReferenceResolver>,
        fetcher: Arc<RateLimitedFetcher>,
        writer: Arc<dyn CorpusSink>,
        state: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            writer,
            state,
            clock,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Replace the orchestrator's cancel token with an external one (e.g. wired to Ctrl-C).
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Drive every record of `feed` through resolve, extract and write with
    /// `options.concurrency` workers.
    ///
    /// A fatal write error stops the run and is returned; everything else is
    /// recorded per record and summarized in the report.
    pub async fn run<R>(&self, feed: R, options: &HarvestOptions) -> Result<HarvestReport, HarvestError>
    where
        R: BufRead + Send + 'static,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = HarvestReport::new(run_id.clone(), self.clock.now());
        let concurrency = options.concurrency.max(1);
        info!(run_id = %run_id, concurrency, force_refresh = options.force_refresh, since = ?options.since, "Starting harvest");

        // Cancelling the caller's token cancels this one; a fatal abort only this one.
        let run_token = self.cancel_token.child_token();
        let (tx, rx) = mpsc::channel::<VulnerabilityRecord>(concurrency * 4);
        let producer = spawn_producer(feed, tx, options.since, run_token.clone());

        let worker = RecordWorker {
            resolver: self.resolver.clone(),
            fetcher: self.fetcher.clone(),
            extractor: Arc::new(
                CommitDiffExtractor::new(self.fetcher.clone(), options.max_blob_bytes)
                    .with_cancellation(run_token.clone()),
            ),
            writer: self.writer.clone(),
            state: self.state.clone(),
            clock: self.clock.clone(),
            cancel: run_token.clone(),
            force_refresh: options.force_refresh,
            report: Arc::new(Mutex::new(report.clone())),
        };

        let rx = Arc::new(Mutex::new(rx));
        let handles: Vec<_> = (0..concurrency)
            .map(|n| {
                let worker = worker.clone();
                let rx = rx.clone();
                tokio::spawn(async move { worker.run_loop(n, rx).await })
            })
            .collect();

        let mut fatal: Option<HarvestError> = None;
        for joined in futures::future::join_all(handles).await {
            let result = joined.unwrap_or_else(|e| Err(HarvestError::Internal(format!("Worker panicked: {}", e))));
            if let Err(e) = result {
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }
        // Unblock the producer if workers stopped early.
        drop(rx);

        let produced = match producer.await {
            Ok(result) => result,
            Err(e) => Err(HarvestError::Internal(format!("Feed reader panicked: {}", e))),
        };

        report = worker.report.lock().await.clone();
        report.cancelled = self.cancel_token.is_cancelled();
        match produced {
            Ok(stats) => {
                report.feed_records = stats.feed.records;
                report.invalid_feed_records = stats.feed.invalid;
                report.duplicates = stats.duplicates;
                report.filtered = stats.filtered;
            }
            Err(e) if fatal.is_none() => fatal = Some(e),
            Err(e) => warn!(error = %e, "Feed reader failed after abort"),
        }
        report.finish(self.clock.now(), self.fetcher.stats());

        if let Some(e) = fatal {
            error!(
                error = %e,
                resolved = report.resolved,
                unresolved = report.unresolved,
                failed = report.failed,
                "Harvest aborted"
            );
            return Err(e);
        }

        info!(
            run_id = %report.run_id,
            resolved = report.resolved,
            unresolved = report.unresolved,
            failed = report.failed,
            skipped = report.skipped,
            api_calls = report.api.total_calls,
            elapsed_ms = report.elapsed_ms,
            cancelled = report.cancelled,
            "Harvest complete"
        );
        Ok(report)
    }
}

/// Stream the feed on a blocking thread into the bounded queue, dropping
/// duplicate ids and records outside the year window.
fn spawn_producer<R>(
    feed: R,
    tx: mpsc::Sender<VulnerabilityRecord>,
    since: Option<i32>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<ProducerStats, HarvestError>>
where
    R: BufRead + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut seen = HashSet::new();
        let mut duplicates = 0;
        let mut filtered = 0;
        let feed = for_each_record(feed, |record| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            if !seen.insert(record.id.clone()) {
                debug!(id = %record.id, "Duplicate record in feed");
                duplicates += 1;
                return ControlFlow::Continue(());
            }
            if since.is_some_and(|year| record.disclosure_year < year) {
                filtered += 1;
                return ControlFlow::Continue(());
            }
            match tx.blocking_send(record) {
                Ok(()) => ControlFlow::Continue(()),
                // Every worker is gone.
                Err(_) => ControlFlow::Break(()),
            }
        })?;
        Ok(ProducerStats { feed, duplicates, filtered })
    })
}

#[derive(Clone)]
struct RecordWorker {
    resolver: Arc<ReferenceResolver>,
    fetcher: Arc<RateLimitedFetcher>,
    extractor: Arc<CommitDiffExtractor>,
    writer: Arc<dyn CorpusSink>,
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    force_refresh: bool,
    report: Arc<Mutex<HarvestReport>>,
}

impl RecordWorker {
    async fn run_loop(&self, n: usize, rx: Arc<Mutex<mpsc::Receiver<VulnerabilityRecord>>>) -> Result<(), HarvestError> {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker = n, "Worker stopping on cancellation");
                return Ok(());
            }
            let next = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    record = rx.recv() => record,
                    _ = self.cancel.cancelled() => None,
                }
            };
            let Some(record) = next else {
                return Ok(());
            };

            let processed = AssertUnwindSafe(self.process(&record)).catch_unwind().await;
            let result = match processed {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_payload_to_string(payload.as_ref());
                    self.record_panic(n, &record, &message).await
                }
            };

            match result {
                Ok(outcome) => {
                    let mut report = self.report.lock().await;
                    match outcome {
                        RecordOutcome::Skipped => report.skipped += 1,
                        RecordOutcome::Resolved => report.resolved += 1,
                        RecordOutcome::Unresolved => {
                            report.unresolved += 1;
                            report.unresolved_ids.push(record.id.clone());
                        }
                        RecordOutcome::Failed => report.failed += 1,
                        RecordOutcome::Interrupted => report.interrupted += 1,
                    }
                }
                Err(e) => {
                    error!(worker = n, id = %record.id, error = %e, "Fatal error, aborting harvest");
                    self.cancel.cancel();
                    return Err(e);
                }
            }
        }
    }

    /// A panic while processing one record fails that record only.
    async fn record_panic(
        &self,
        n: usize,
        record: &VulnerabilityRecord,
        message: &str,
    ) -> Result<RecordOutcome, HarvestError> {
        let detail = format!("panicked: {}", message);
        error!(worker = n, id = %record.id, detail = %detail, "Record processing panicked");
        self.state.put(&StateEntry::with_error(
            &record.id,
            self.clock.now(),
            RecordStatus::Failed,
            PANIC_ERROR_KIND,
            &detail,
        ))?;
        self.report.lock().await.failed_records.push(FailedRecord {
            id: record.id.clone(),
            error_kind: PANIC_ERROR_KIND.to_string(),
            detail,
        });
        Ok(RecordOutcome::Failed)
    }

    /// One record from Pending to a terminal state. `Err` is fatal to the run.
    async fn process(&self, record: &VulnerabilityRecord) -> Result<RecordOutcome, HarvestError> {
        if let Some(existing) = self.state.get(&record.id)? {
            if existing.status.is_terminal() && !self.force_refresh {
                debug!(id = %record.id, status = %existing.status, "Already harvested, skipping");
                return Ok(RecordOutcome::Skipped);
            }
        }

        self.state.put(&StateEntry::pending(&record.id, self.clock.now()))?;

        let mut candidates = self.resolver.resolve(record).peekable();
        if candidates.peek().is_none() {
            info!(id = %record.id, "No usable reference");
            self.finish_unresolved(record, ResolveError::NoCandidates, "no reference matched a commit or pull request link")?;
            return Ok(RecordOutcome::Unresolved);
        }

        let mut last_error = String::new();
        for candidate in candidates {
            if self.cancel.is_cancelled() {
                return Ok(RecordOutcome::Interrupted);
            }
            match self.attempt(&candidate).await {
                Ok((commit, diff)) => {
                    if self.cancel.is_cancelled() {
                        return Ok(RecordOutcome::Interrupted);
                    }
                    return self.write(record, &candidate, &commit, diff).await;
                }
                Err(AttemptError::Cancelled) => return Ok(RecordOutcome::Interrupted),
                Err(e) => {
                    let class = e.classify();
                    warn!(
                        id = %record.id,
                        candidate = %candidate.source_url,
                        error_type = class.error_type,
                        retryable = class.retryable,
                        error = %e,
                        "Candidate failed, trying next"
                    );
                    last_error = format!("{}: {}", candidate.source_url, e);
                }
            }
        }

        self.finish_unresolved(record, ResolveError::AllCandidatesExhausted, &last_error)?;
        Ok(RecordOutcome::Unresolved)
    }

    async fn attempt(&self, candidate: &CandidateReference) -> Result<(String, crate::models::CommitDiff), AttemptError> {
        let commit = self.resolver.commit_for(candidate, &self.fetcher).await?;
        if self.cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        let diff = self.extractor.extract_diff(&candidate.repo, &commit).await?;
        Ok((commit, diff))
    }

    async fn write(
        &self,
        record: &VulnerabilityRecord,
        candidate: &CandidateReference,
        commit: &str,
        diff: crate::models::CommitDiff,
    ) -> Result<RecordOutcome, HarvestError> {
        match self.writer.commit(record, &diff).await {
            Ok(written) => {
                let repository = diff.repo.to_string();
                self.state.put(&StateEntry::resolved(&record.id, self.clock.now(), &diff.commit, &repository))?;
                self.report.lock().await.files.add(&written, diff.skipped_files().count());
                info!(
                    id = %record.id,
                    commit = %diff.commit,
                    requested = %commit,
                    source = %candidate.source_url,
                    confidence = ?candidate.confidence,
                    "Record resolved"
                );
                Ok(RecordOutcome::Resolved)
            }
            Err(e) if e.is_fatal() => Err(HarvestError::Write(e)),
            Err(e) => {
                let class = e.classify();
                error!(id = %record.id, error_type = class.error_type, error = %e, "Record failed");
                let detail = e.to_string();
                self.state.put(&StateEntry::with_error(
                    &record.id,
                    self.clock.now(),
                    RecordStatus::Failed,
                    class.error_type,
                    &detail,
                ))?;
                self.report.lock().await.failed_records.push(FailedRecord {
                    id: record.id.clone(),
                    error_kind: class.error_type.to_string(),
                    detail,
                });
                Ok(RecordOutcome::Failed)
            }
        }
    }

    fn finish_unresolved(&self, record: &VulnerabilityRecord, reason: ResolveError, detail: &str) -> Result<(), HarvestError> {
        self.state.put(&StateEntry::with_error(
            &record.id,
            self.clock.now(),
            RecordStatus::Unresolved,
            reason.as_str(),
            detail,
        ))
    }
}

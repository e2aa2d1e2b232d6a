use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::errors::{with_retry, FetchError, RetryPolicy};
use crate::models::{CommitInfo, RepoRef};
use super::api::{CodeHostApi, CommitPage, FetchRequest, FetchResponse};
use super::bucket::{Admission, BucketConfig, TokenBucket};
use super::clock::Clock;

/// API call counters reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ApiCallStats {
    pub total_calls: u64,
    pub retries: u64,
    pub throttle_events: u64,
    pub calls_by_host: BTreeMap<String, u64>,
}

#[derive(Default)]
struct FetchCounters {
    total_calls: AtomicU64,
    retries: AtomicU64,
    throttle_events: AtomicU64,
    by_host: DashMap<String, u64>,
}

/// Upper bound on pages followed for one commit's file list.
const MAX_COMMIT_PAGES: u32 = 100;

/// Throttling, retrying front-end for a [`CodeHostApi`].
///
/// One token bucket exists per upstream API identity; every caller that talks
/// to the same host shares it.
pub struct RateLimitedFetcher {
    api: Arc<dyn CodeHostApi>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    bucket_config: BucketConfig,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    counters: FetchCounters,
}

impl RateLimitedFetcher {
    pub fn new(
        api: Arc<dyn CodeHostApi>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        bucket_config: BucketConfig,
    ) -> Self {
        Self {
            api,
            clock,
            retry,
            bucket_config,
            buckets: DashMap::new(),
            counters: FetchCounters::default(),
        }
    }

    pub fn api(&self) -> &Arc<dyn CodeHostApi> {
        &self.api
    }

    fn bucket_for(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(self.bucket_config.clone(), self.clock.now())))
            })
            .clone()
    }

    /// Wait for a token. The bucket lock is only held to compute admission,
    /// never across a sleep.
    async fn acquire(&self, key: &str, bucket: &Mutex<TokenBucket>) {
        loop {
            let admission = {
                let mut guard = bucket.lock().unwrap_or_else(|p| p.into_inner());
                guard.try_acquire(self.clock.now())
            };
            match admission {
                Admission::Proceed => return,
                Admission::WaitUntil(until) => {
                    debug!(host = key, until = %until, "Waiting for rate-limit bucket");
                    self.clock.sleep_until(until).await;
                }
            }
        }
    }

    fn throttle(&self, key: &str, bucket: &Mutex<TokenBucket>, error: &FetchError) {
        if let FetchError::RateLimited { reset_at, .. } = error {
            let until = {
                let mut guard = bucket.lock().unwrap_or_else(|p| p.into_inner());
                guard.throttle(self.clock.now(), *reset_at)
            };
            self.counters.throttle_events.fetch_add(1, Ordering::Relaxed);
            info!(host = key, until = %until, "Upstream rate limit hit, bucket throttled");
        }
    }

    async fn dispatch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        match request {
            FetchRequest::CommitPage { repo, sha, page } => {
                self.api.get_commit_page(repo, sha, *page).await.map(FetchResponse::CommitPage)
            }
            FetchRequest::FileAtRef { repo, reference, path } => {
                self.api.get_file_at_ref(repo, reference, path).await.map(FetchResponse::File)
            }
            FetchRequest::PullRequestHead { repo, number } => {
                self.api.resolve_pull_request_head(repo, *number).await.map(FetchResponse::Head)
            }
        }
    }

    /// Perform one logical request: acquire from the shared bucket, call the
    /// API, throttle on rate-limit signals, and retry transient failures.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let key = request.provider().bucket_key().to_string();
        let bucket = self.bucket_for(&key);
        let operation = request.describe();

        with_retry(&operation, &self.retry, self.clock.as_ref(), |attempt| {
            let request = &request;
            let bucket = &bucket;
            let key = &key;
            async move {
                self.acquire(key, bucket).await;
                self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
                *self.counters.by_host.entry(key.clone()).or_insert(0) += 1;
                if attempt > 0 {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                }

                let result = self.dispatch(request).await;
                if let Err(e) = &result {
                    self.throttle(key, bucket, e);
                }
                result
            }
        })
        .await
    }

    async fn get_commit_page(&self, repo: &RepoRef, sha: &str, page: u32) -> Result<CommitPage, FetchError> {
        let request = FetchRequest::CommitPage { repo: repo.clone(), sha: sha.to_string(), page };
        match self.fetch(request).await? {
            FetchResponse::CommitPage(page) => Ok(page),
            other => Err(unexpected_response("commit page", &other)),
        }
    }

    /// Commit metadata with the full file list. Each page is its own metered
    /// request; a failure on a later page retries only that page.
    pub async fn get_commit(&self, repo: &RepoRef, sha: &str) -> Result<CommitInfo, FetchError> {
        let first = self.get_commit_page(repo, sha, 1).await?;
        let mut info = first.commit;
        let mut more = first.more;
        let mut page = 1;
        while more {
            if page >= MAX_COMMIT_PAGES {
                warn!(repo = %repo, commit = %sha, pages = page, "Commit file list truncated");
                break;
            }
            page += 1;
            let next = self.get_commit_page(repo, sha, page).await?;
            info.files.extend(next.commit.files);
            more = next.more;
        }
        Ok(info)
    }

    pub async fn get_file_at_ref(
        &self,
        repo: &RepoRef,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let request = FetchRequest::FileAtRef {
            repo: repo.clone(),
            reference: reference.to_string(),
            path: path.to_string(),
        };
        match self.fetch(request).await? {
            FetchResponse::File(bytes) => Ok(bytes),
            other => Err(unexpected_response("file", &other)),
        }
    }

    pub async fn resolve_pull_request_head(&self, repo: &RepoRef, number: u64) -> Result<String, FetchError> {
        let request = FetchRequest::PullRequestHead { repo: repo.clone(), number };
        match self.fetch(request).await? {
            FetchResponse::Head(sha) => Ok(sha),
            other => Err(unexpected_response("pull request head", &other)),
        }
    }

    pub fn stats(&self) -> ApiCallStats {
        ApiCallStats {
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            throttle_events: self.counters.throttle_events.load(Ordering::Relaxed),
            calls_by_host: self
                .counters
                .by_host
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

fn unexpected_response(expected: &str, got: &FetchResponse) -> FetchError {
    let kind = match got {
        FetchResponse::CommitPage(_) => "commit page",
        FetchResponse::File(_) => "file",
        FetchResponse::Head(_) => "head",
    };
    FetchError::InvalidResponse(format!("expected {} response, got {}", expected, kind))
}

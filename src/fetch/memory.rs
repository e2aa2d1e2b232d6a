use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::errors::FetchError;
use crate::models::{CommitInfo, FileChange, RepoRef};
use super::api::{CodeHostApi, CommitPage, FetchRequest};

/// A code host backed by maps, for tests and offline runs.
///
/// Commits are looked up by full sha or by an abbreviated prefix, as the real
/// APIs do. Scripted failures are consumed before the stored answer. File
/// lists are served as a single page unless a page size is set.
#[derive(Default)]
pub struct InMemoryCodeHost {
    commits: Mutex<HashMap<RepoRef, Vec<CommitInfo>>>,
    files: Mutex<HashMap<(RepoRef, String, String), Vec<u8>>>,
    pulls: Mutex<HashMap<(RepoRef, u64), String>>,
    failures: Mutex<HashMap<FetchRequest, VecDeque<FetchError>>>,
    calls: Mutex<Vec<FetchRequest>>,
    page_size: Option<usize>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl InMemoryCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, files_per_page: usize) -> Self {
        self.page_size = Some(files_per_page.max(1));
        self
    }

    pub fn add_commit(&self, repo: &RepoRef, sha: &str, parents: &[&str], files: Vec<FileChange>) {
        let info = CommitInfo {
            sha: sha.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            files,
        };
        let mut commits = lock(&self.commits);
        let list = commits.entry(repo.clone()).or_default();
        list.retain(|c| c.sha != sha);
        list.push(info);
    }

    pub fn put_file(&self, repo: &RepoRef, reference: &str, path: &str, content: &[u8]) {
        lock(&self.files).insert(
            (repo.clone(), reference.to_string(), path.to_string()),
            content.to_vec(),
        );
    }

    pub fn add_pull_request(&self, repo: &RepoRef, number: u64, sha: &str) {
        lock(&self.pulls).insert((repo.clone(), number), sha.to_string());
    }

    /// Queue an error returned by the next matching request.
    pub fn fail_next(&self, request: FetchRequest, error: FetchError) {
        lock(&self.failures).entry(request).or_default().push_back(error);
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn record(&self, request: FetchRequest) -> Result<(), FetchError> {
        lock(&self.calls).push(request.clone());
        match lock(&self.failures).get_mut(&request).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CodeHostApi for InMemoryCodeHost {
    async fn get_commit_page(&self, repo: &RepoRef, sha: &str, page: u32) -> Result<CommitPage, FetchError> {
        self.record(FetchRequest::CommitPage { repo: repo.clone(), sha: sha.to_string(), page })?;
        let mut commit = lock(&self.commits)
            .get(repo)
            .and_then(|list| list.iter().find(|c| c.sha.starts_with(sha)))
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("commit {}@{}", repo, sha)))?;

        let Some(size) = self.page_size else {
            return Ok(CommitPage { commit, more: false });
        };
        let start = (page.max(1) as usize - 1) * size;
        let more = commit.files.len() > start + size;
        commit.files = commit.files.into_iter().skip(start).take(size).collect();
        Ok(CommitPage { commit, more })
    }

    async fn get_file_at_ref(
        &self,
        repo: &RepoRef,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError> {
        self.record(FetchRequest::FileAtRef {
            repo: repo.clone(),
            reference: reference.to_string(),
            path: path.to_string(),
        })?;
        lock(&self.files)
            .get(&(repo.clone(), reference.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("file {}@{}:{}", repo, reference, path)))
    }

    async fn resolve_pull_request_head(&self, repo: &RepoRef, number: u64) -> Result<String, FetchError> {
        self.record(FetchRequest::PullRequestHead { repo: repo.clone(), number })?;
        lock(&self.pulls)
            .get(&(repo.clone(), number))
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("pull {}#{}", repo, number)))
    }
}

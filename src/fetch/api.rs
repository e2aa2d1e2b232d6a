use async_trait::async_trait;
use crate::errors::FetchError;
use crate::models::{CommitInfo, Provider, RepoRef};

/// One page of a commit's change summary. Pages are numbered from 1; only
/// the first page is guaranteed to carry the commit's sha and parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPage {
    pub commit: CommitInfo,
    /// Another page follows this one.
    pub more: bool,
}

/// Minimal surface of a code-hosting API needed to harvest a fix commit.
///
/// Every method is exactly one outbound call, so the caller can meter each
/// against the host's rate limit.
#[async_trait]
pub trait CodeHostApi: Send + Sync {
    async fn get_commit_page(&self, repo: &RepoRef, sha: &str, page: u32) -> Result<CommitPage, FetchError>;

    async fn get_file_at_ref(
        &self,
        repo: &RepoRef,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError>;

    /// Commit that represents a pull/merge request: its merge commit once
    /// merged, otherwise its head.
    async fn resolve_pull_request_head(&self, repo: &RepoRef, number: u64) -> Result<String, FetchError>;

    /// Startup reachability check.
    async fn check_reachable(&self, _provider: &Provider) -> Result<(), FetchError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    CommitPage { repo: RepoRef, sha: String, page: u32 },
    FileAtRef { repo: RepoRef, reference: String, path: String },
    PullRequestHead { repo: RepoRef, number: u64 },
}

impl FetchRequest {
    pub fn provider(&self) -> &Provider {
        match self {
            Self::CommitPage { repo, .. }
            | Self::FileAtRef { repo, .. }
            | Self::PullRequestHead { repo, .. } => &repo.provider,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::CommitPage { repo, sha, page } => format!("commit {}@{} page {}", repo, sha, page),
            Self::FileAtRef { repo, reference, path } => format!("file {}@{}:{}", repo, reference, path),
            Self::PullRequestHead { repo, number } => format!("pull {}#{}", repo, number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    CommitPage(CommitPage),
    File(Vec<u8>),
    Head(String),
}

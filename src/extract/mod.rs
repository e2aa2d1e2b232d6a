//! Commit diff extraction: a candidate's change summary plus the pre-/post-fix
//! bytes of every touched file.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{AttemptError, ExtractError, FetchError};
use crate::fetch::RateLimitedFetcher;
use crate::models::{BlobRef, ChangeType, ChangedFile, CommitDiff, FileChange, RepoRef};

pub const DEFAULT_MAX_BLOB_BYTES: u64 = 1024 * 1024;
/// Same window git inspects to call a blob binary.
const BINARY_SNIFF_BYTES: usize = 8000;

pub fn looks_binary(content: &[u8]) -> bool {
    content.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

pub struct CommitDiffExtractor {
    fetcher: Arc<RateLimitedFetcher>,
    max_blob_bytes: u64,
    cancel: CancellationToken,
}

impl CommitDiffExtractor {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, max_blob_bytes: u64) -> Self {
        Self {
            fetcher,
            max_blob_bytes,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between files once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn extract_diff(&self, repo: &RepoRef, sha: &str) -> Result<CommitDiff, AttemptError> {
        let info = self.fetcher.get_commit(repo, sha).await?;
        // Merge commits are diffed against their first parent only.
        let base_parent = info.parents.first().cloned();

        let mut files = Vec::with_capacity(info.files.len());
        for change in &info.files {
            if self.cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }
            files.push(self.extract_file(repo, &info.sha, base_parent.as_deref(), change).await?);
        }

        let diff = CommitDiff {
            commit: info.sha.clone(),
            repo: repo.clone(),
            base_parent,
            files,
        };

        let stored = diff.storable_files().count();
        let skipped = diff.skipped_files().count();
        if stored == 0 {
            return Err(AttemptError::NoStorableFiles { commit: diff.commit });
        }
        info!(repo = %repo, commit = %diff.commit, stored, skipped, "Extracted commit diff");
        Ok(diff)
    }

    async fn extract_file(
        &self,
        repo: &RepoRef,
        commit: &str,
        base_parent: Option<&str>,
        change: &FileChange,
    ) -> Result<ChangedFile, AttemptError> {
        // Without a parent nothing existed before: every file is new.
        let change_type = match base_parent {
            None => ChangeType::Added,
            Some(_) => change.change_type,
        };

        let pre_path = change.previous_path.as_deref().unwrap_or(&change.path);
        let pre_image_blob = match base_parent {
            Some(parent) if change_type.has_pre_image() => Some(BlobRef::new(parent, pre_path)),
            _ => None,
        };
        let post_image_blob = change_type
            .has_post_image()
            .then(|| BlobRef::new(commit, &change.path));

        let mut file = ChangedFile {
            path: change.path.clone(),
            previous_path: change.previous_path.clone(),
            change_type,
            pre_image_blob,
            post_image_blob,
            pre_image: None,
            post_image: None,
            skipped: None,
        };

        if change.submodule {
            return Ok(self.skip(file, |path| ExtractError::UnsupportedCommitShape {
                path,
                detail: "submodule pointer".into(),
            }));
        }

        if let Some(blob) = &file.pre_image_blob {
            file.pre_image = self.fetch_optional(repo, blob).await?;
        }
        if let Some(blob) = &file.post_image_blob {
            file.post_image = self.fetch_optional(repo, blob).await?;
            if file.post_image.is_none() {
                return Ok(self.skip(file, |path| ExtractError::UnsupportedCommitShape {
                    path,
                    detail: "post-image not retrievable".into(),
                }));
            }
        } else if file.pre_image.is_none() {
            return Ok(self.skip(file, |path| ExtractError::UnsupportedCommitShape {
                path,
                detail: "deleted file without a retrievable pre-image".into(),
            }));
        }

        let images = [file.pre_image.as_deref(), file.post_image.as_deref()];
        if let Some(size) = images.iter().flatten().map(|b| b.len() as u64).find(|n| *n > self.max_blob_bytes) {
            let limit = self.max_blob_bytes;
            return Ok(self.skip(file, |path| ExtractError::BlobTooLarge { path, size, limit }));
        }
        if images.iter().flatten().any(|b| looks_binary(b)) {
            return Ok(self.skip(file, |path| ExtractError::BinaryFile { path }));
        }

        Ok(file)
    }

    /// A missing blob is an expected shape, not a failure of the candidate.
    async fn fetch_optional(&self, repo: &RepoRef, blob: &BlobRef) -> Result<Option<Vec<u8>>, AttemptError> {
        match self.fetcher.get_file_at_ref(repo, &blob.commitish, &blob.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn skip(&self, mut file: ChangedFile, reason: impl FnOnce(String) -> ExtractError) -> ChangedFile {
        let reason = reason(file.path.clone());
        debug!(path = %file.path, reason = %reason, "Skipping file");
        file.pre_image = None;
        file.post_image = None;
        file.skipped = Some(reason);
        file
    }
}

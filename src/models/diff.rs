use serde::{Deserialize, Serialize};
use crate::errors::ExtractError;
use super::candidate::RepoRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeType {
    pub fn has_pre_image(&self) -> bool {
        !matches!(self, ChangeType::Added)
    }

    pub fn has_post_image(&self) -> bool {
        !matches!(self, ChangeType::Deleted)
    }
}

/// One entry of a commit's change summary as reported by the code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub previous_path: Option<String>,
    pub change_type: ChangeType,
    /// Gitlink entries have no file content to harvest.
    #[serde(default)]
    pub submodule: bool,
}

impl FileChange {
    pub fn new(path: &str, change_type: ChangeType) -> Self {
        Self {
            path: path.to_string(),
            previous_path: None,
            change_type,
            submodule: false,
        }
    }
}

/// Commit metadata and per-file change summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub parents: Vec<String>,
    pub files: Vec<FileChange>,
}

/// Address of a file blob: a path as of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub commitish: String,
    pub path: String,
}

impl BlobRef {
    pub fn new(commitish: &str, path: &str) -> Self {
        Self { commitish: commitish.to_string(), path: path.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub previous_path: Option<String>,
    pub change_type: ChangeType,
    pub pre_image_blob: Option<BlobRef>,
    pub post_image_blob: Option<BlobRef>,
    pub pre_image: Option<Vec<u8>>,
    pub post_image: Option<Vec<u8>>,
    pub skipped: Option<ExtractError>,
}

impl ChangedFile {
    /// Bytes that represent this file in the corpus: the post-image, or the
    /// pre-image for deletions. `None` when the file was skipped.
    pub fn stored_content(&self) -> Option<&[u8]> {
        if self.skipped.is_some() {
            return None;
        }
        match self.change_type {
            ChangeType::Deleted => self.pre_image.as_deref(),
            _ => self.post_image.as_deref(),
        }
    }
    /// The vulnerable image kept beside a stored post-fix file. Only modified
    /// and renamed files have one; a deletion already stores its pre-image.
    pub fn pre_image_content(&self) -> Option<&[u8]> {
        if self.skipped.is_some() {
            return None;
        }
        match self.change_type {
            ChangeType::Modified | ChangeType::Renamed => self.pre_image.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDiff {
    pub commit: String,
    pub repo: RepoRef,
    /// First parent used as the diff base; `None` for root commits.
    pub base_parent: Option<String>,
    pub files: Vec<ChangedFile>,
}

impl CommitDiff {
    pub fn storable_files(&self) -> impl Iterator<Item = &ChangedFile> {
        self.files.iter().filter(|f| f.stored_content().is_some())
    }

    pub fn skipped_files(&self) -> impl Iterator<Item = &ChangedFile> {
        self.files.iter().filter(|f| f.skipped.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(change_type: ChangeType) -> ChangedFile {
        ChangedFile {
            path: "src/a.c".into(),
            previous_path: None,
            change_type,
            pre_image_blob: None,
            post_image_blob: None,
            pre_image: Some(b"before".to_vec()),
            post_image: Some(b"after".to_vec()),
            skipped: None,
        }
    }

    #[test]
    fn test_image_presence_by_change_type() {
        assert!(!ChangeType::Added.has_pre_image());
        assert!(ChangeType::Added.has_post_image());
        assert!(ChangeType::Deleted.has_pre_image());
        assert!(!ChangeType::Deleted.has_post_image());
        assert!(ChangeType::Renamed.has_pre_image() && ChangeType::Renamed.has_post_image());
    }

    #[test]
    fn test_stored_content_prefers_post_image() {
        assert_eq!(file(ChangeType::Modified).stored_content(), Some(&b"after"[..]));
    }

    #[test]
    fn test_stored_content_deleted_uses_pre_image() {
        assert_eq!(file(ChangeType::Deleted).stored_content(), Some(&b"before"[..]));
    }

    #[test]
    fn test_skipped_file_has_no_content() {
        let mut f = file(ChangeType::Modified);
        f.skipped = Some(ExtractError::BinaryFile { path: f.path.clone() });
        assert_eq!(f.stored_content(), None);
    }

    #[test]
    fn test_pre_image_content_only_beside_post_image() {
        assert_eq!(file(ChangeType::Modified).pre_image_content(), Some(&b"before"[..]));
        assert_eq!(file(ChangeType::Renamed).pre_image_content(), Some(&b"before"[..]));
        assert_eq!(file(ChangeType::Deleted).pre_image_content(), None);
        assert_eq!(file(ChangeType::Added).pre_image_content(), None);

        let mut skipped = file(ChangeType::Modified);
        skipped.skipped = Some(ExtractError::BinaryFile { path: "src/a.c".into() });
        assert_eq!(skipped.pre_image_content(), None);
    }
}

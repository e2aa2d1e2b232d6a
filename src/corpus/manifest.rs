use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::WriteError;
use crate::models::ChangeType;

pub const MANIFEST_FILE: &str = ".manifest.json";
/// Subdirectory holding the pre-fix images of modified and renamed files.
pub const PRE_IMAGE_DIR: &str = "pre";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub original_path: String,
    pub stored_filename: String,
    pub change_type: ChangeType,
    pub sha256: String,
    /// `pre/<storedFilename>` when the vulnerable image is kept too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stored_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_sha256: Option<String>,
}

/// Per-vulnerability record of what was harvested and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub resolved_commit: String,
    pub repository: String,
    pub files: Vec<ManifestFile>,
    /// Patch file name, absent when no patch was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    pub harvested_at: DateTime<Utc>,
}

impl Manifest {
    /// Same harvest result, ignoring when it was produced.
    pub fn same_content(&self, other: &Manifest) -> bool {
        self.id == other.id
            && self.resolved_commit == other.resolved_commit
            && self.repository == other.repository
            && self.files == other.files
            && self.patch == other.patch
    }

    /// Load the manifest of an entry directory. Missing or unreadable
    /// manifests are treated as absent.
    pub async fn load(dir: &Path) -> Option<Manifest> {
        let raw = tokio::fs::read(dir.join(MANIFEST_FILE)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, WriteError> {
        let mut out = serde_json::to_vec_pretty(self).map_err(|e| WriteError::Manifest(e.to_string()))?;
        out.push(b'\n');
        Ok(out)
    }
}

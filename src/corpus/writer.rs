use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::WriteError;
use crate::fetch::Clock;
use crate::models::{ChangeType, CommitDiff, VulnerabilityRecord};
use super::manifest::{Manifest, ManifestFile, MANIFEST_FILE, PRE_IMAGE_DIR};
use super::naming::{assign_filenames, path_component, sha256_hex};
use super::patch::{render_patch, PATCH_FILE};

/// One file destined for `data/<year>/<id>/<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub vulnerability_id: String,
    pub year: i32,
    pub filename: String,
    pub original_path: String,
    pub change_type: ChangeType,
    pub content: Vec<u8>,
    pub sha256: String,
    /// Vulnerable image stored as `pre/<filename>`.
    pub pre_content: Option<Vec<u8>>,
    pub pre_sha256: Option<String>,
    pub source_commit: String,
    pub source_repository: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Created,
    Updated,
    Unchanged,
}

/// What one `commit` call did on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub entry_dir: PathBuf,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Pre-fix images created or replaced.
    pub pre_images: usize,
    pub patch_written: bool,
    pub manifest_written: bool,
}

impl WriteReport {
    pub fn changed(&self) -> bool {
        self.files_changed() || self.manifest_written
    }

    fn files_changed(&self) -> bool {
        self.created + self.updated + self.removed + self.pre_images > 0 || self.patch_written
    }

    fn count(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Created => self.created += 1,
            FileOutcome::Updated => self.updated += 1,
            FileOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Destination of resolved records. A fatal error from `commit` aborts the run.
#[async_trait]
pub trait CorpusSink: Send + Sync {
    async fn commit(&self, record: &VulnerabilityRecord, diff: &CommitDiff) -> Result<WriteReport, WriteError>;
}

/// Persists harvested commits into the corpus tree.
pub struct CorpusWriter {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl CorpusWriter {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { root: root.into(), clock }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, record: &VulnerabilityRecord) -> PathBuf {
        self.root
            .join(record.disclosure_year.to_string())
            .join(path_component(&record.id))
    }

    /// Corpus entries for every storable file of `diff`, named for the corpus.
    pub fn plan(&self, record: &VulnerabilityRecord, diff: &CommitDiff) -> Vec<CorpusEntry> {
        let files: Vec<_> = diff
            .storable_files()
            .filter_map(|f| f.stored_content().map(|c| (f, c)))
            .collect();
        let names = assign_filenames(files.iter().map(|(f, _)| f.path.as_str()));

        files
            .into_iter()
            .zip(names)
            .map(|((file, content), filename)| CorpusEntry {
                vulnerability_id: record.id.clone(),
                year: record.disclosure_year,
                filename,
                original_path: file.path.clone(),
                change_type: file.change_type,
                content: content.to_vec(),
                sha256: sha256_hex(content),
                pre_content: file.pre_image_content().map(<[u8]>::to_vec),
                pre_sha256: file.pre_image_content().map(sha256_hex),
                source_commit: diff.commit.clone(),
                source_repository: diff.repo.to_string(),
            })
            .collect()
    }

    /// Write one record's harvest: stored files, pre-fix images under `pre/`
    /// and the `.diff` patch. Each file is replaced atomically and only when
    /// its content hash differs; the manifest goes last and is left alone when
    /// nothing about the entry changed.
    pub async fn commit(&self, record: &VulnerabilityRecord, diff: &CommitDiff) -> Result<WriteReport, WriteError> {
        let dir = self.entry_dir(record);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WriteError::from_io(&dir, e))?;

        let entries = self.plan(record, diff);
        let previous = Manifest::load(&dir).await;
        let mut report = WriteReport { entry_dir: dir.clone(), ..Default::default() };

        for entry in &entries {
            let outcome = write_if_changed(&dir.join(&entry.filename), &entry.content, &entry.sha256).await?;
            debug!(id = %record.id, file = %entry.filename, outcome = ?outcome, "Corpus file");
            report.count(outcome);
        }

        let pre_dir = dir.join(PRE_IMAGE_DIR);
        let mut has_pre_images = false;
        for entry in &entries {
            let (Some(content), Some(sha256)) = (&entry.pre_content, &entry.pre_sha256) else {
                continue;
            };
            if !has_pre_images {
                tokio::fs::create_dir_all(&pre_dir)
                    .await
                    .map_err(|e| WriteError::from_io(&pre_dir, e))?;
                has_pre_images = true;
            }
            if write_if_changed(&pre_dir.join(&entry.filename), content, sha256).await? != FileOutcome::Unchanged {
                report.pre_images += 1;
            }
        }

        let patch = render_patch(diff);
        let patch_outcome = write_if_changed(&dir.join(PATCH_FILE), patch.as_bytes(), &sha256_hex(patch.as_bytes())).await?;
        report.patch_written = patch_outcome != FileOutcome::Unchanged;

        if let Some(previous) = &previous {
            let keep: HashSet<String> = entries
                .iter()
                .flat_map(|e| {
                    let pre = e.pre_content.as_ref().map(|_| pre_image_name(&e.filename));
                    std::iter::once(e.filename.clone()).chain(pre)
                })
                .collect();
            let recorded = previous
                .files
                .iter()
                .flat_map(|f| std::iter::once(f.stored_filename.as_str()).chain(f.pre_stored_filename.as_deref()))
                .collect::<Vec<&str>>();
            for stale in recorded {
                if keep.contains(stale) {
                    continue;
                }
                let Some(path) = recorded_path(&dir, stale) else {
                    continue;
                };
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => report.removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(WriteError::from_io(&path, e)),
                }
            }
        }
        if !has_pre_images {
            // Only succeeds once the directory is empty.
            let _ = tokio::fs::remove_dir(&pre_dir).await;
        }

        let manifest = Manifest {
            id: record.id.clone(),
            resolved_commit: diff.commit.clone(),
            repository: diff.repo.to_string(),
            files: entries
                .iter()
                .map(|entry| ManifestFile {
                    original_path: entry.original_path.clone(),
                    stored_filename: entry.filename.clone(),
                    change_type: entry.change_type,
                    sha256: entry.sha256.clone(),
                    pre_stored_filename: entry.pre_content.as_ref().map(|_| pre_image_name(&entry.filename)),
                    pre_sha256: entry.pre_sha256.clone(),
                })
                .collect(),
            patch: Some(PATCH_FILE.to_string()),
            harvested_at: self.clock.now(),
        };

        let manifest_same = previous.as_ref().is_some_and(|p| p.same_content(&manifest));
        if report.files_changed() || !manifest_same {
            atomic_write(&dir.join(MANIFEST_FILE), &manifest.to_json()?).await?;
            report.manifest_written = true;
        }

        info!(
            id = %record.id,
            commit = %diff.commit,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            removed = report.removed,
            pre_images = report.pre_images,
            patch_written = report.patch_written,
            "Corpus entry written"
        );
        Ok(report)
    }
}

#[async_trait]
impl CorpusSink for CorpusWriter {
    async fn commit(&self, record: &VulnerabilityRecord, diff: &CommitDiff) -> Result<WriteReport, WriteError> {
        CorpusWriter::commit(self, record, diff).await
    }
}

fn pre_image_name(filename: &str) -> String {
    format!("{}/{}", PRE_IMAGE_DIR, filename)
}

/// Path of a file named by an earlier manifest. Only plain names in the entry
/// directory or in `pre/` qualify; layout files are never returned.
fn recorded_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let (base, file) = match name.split_once('/') {
        Some((PRE_IMAGE_DIR, file)) => (dir.join(PRE_IMAGE_DIR), file),
        Some(_) => return None,
        None => (dir.to_path_buf(), name),
    };
    if file.contains('/') || file.contains('\\') {
        return None;
    }
    match file {
        "" | "." | ".." | MANIFEST_FILE | PATCH_FILE | PRE_IMAGE_DIR => None,
        _ => Some(base.join(file)),
    }
}

async fn write_if_changed(path: &Path, content: &[u8], sha256: &str) -> Result<FileOutcome, WriteError> {
    let outcome = match tokio::fs::read(path).await {
        Ok(existing) if sha256_hex(&existing) == sha256 => return Ok(FileOutcome::Unchanged),
        Ok(_) => FileOutcome::Updated,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileOutcome::Created,
        Err(e) => return Err(WriteError::from_io(path, e)),
    };
    atomic_write(path, content).await?;
    Ok(outcome)
}

/// Atomic file write: write to a sibling temp file, then rename over the target.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), WriteError> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, content).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(WriteError::from_io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(WriteError::from_io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::SimulatedClock;
    use crate::models::{BlobRef, ChangedFile, ForgeKind, Provider, RepoRef};
    use chrono::{TimeZone, Utc};

    fn record() -> VulnerabilityRecord {
        VulnerabilityRecord::new("CVE-2099-0001", 2099, vec![])
    }

    fn changed(path: &str, change_type: ChangeType, content: &[u8]) -> ChangedFile {
        let deleted = change_type == ChangeType::Deleted;
        ChangedFile {
            path: path.into(),
            previous_path: None,
            change_type,
            pre_image_blob: deleted.then(|| BlobRef::new("p", path)),
            post_image_blob: (!deleted).then(|| BlobRef::new("c", path)),
            pre_image: deleted.then(|| content.to_vec()),
            post_image: (!deleted).then(|| content.to_vec()),
            skipped: None,
        }
    }

    fn diff(commit: &str, files: Vec<ChangedFile>) -> CommitDiff {
        CommitDiff {
            commit: commit.into(),
            repo: RepoRef::new(Provider::new(ForgeKind::GitHub, "github.com"), "acme/web"),
            base_parent: Some("p".into()),
            files,
        }
    }

    fn writer(root: &Path) -> CorpusWriter {
        let clock = Arc::new(SimulatedClock::new(Utc.with_ymd_and_hms(2099, 3, 1, 0, 0, 0).unwrap()));
        CorpusWriter::new(root, clock)
    }

    #[tokio::test]
    async fn test_layout_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let d = diff("c1", vec![
            changed("src/Foo.php", ChangeType::Modified, b"<?php fixed"),
            changed("src/old.php", ChangeType::Deleted, b"<?php old"),
        ]);

        let report = w.commit(&record(), &d).await.unwrap();
        let dir = tmp.path().join("2099").join("CVE-2099-0001");
        assert_eq!(report.entry_dir, dir);
        assert_eq!(report.created, 2);
        assert!(report.manifest_written);
        assert_eq!(std::fs::read(dir.join("Foo.php")).unwrap(), b"<?php fixed");
        assert_eq!(std::fs::read(dir.join("old.php")).unwrap(), b"<?php old");

        let manifest: Manifest = serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.resolved_commit, "c1");
        assert_eq!(manifest.repository, "github.com/acme/web");
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[1].change_type, ChangeType::Deleted);
        assert_eq!(manifest.patch.as_deref(), Some(PATCH_FILE));

        let patch = std::fs::read_to_string(dir.join(PATCH_FILE)).unwrap();
        assert!(patch.contains("+++ b/src/Foo.php"));
        assert!(patch.contains("--- a/src/old.php\n+++ /dev/null"));
    }

    fn modified(path: &str, before: &[u8], after: &[u8]) -> ChangedFile {
        ChangedFile {
            pre_image_blob: Some(BlobRef::new("p", path)),
            pre_image: Some(before.to_vec()),
            ..changed(path, ChangeType::Modified, after)
        }
    }

    #[tokio::test]
    async fn test_pre_images_stored_beside_fix() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let d = diff("c1", vec![
            modified("src/q.php", b"query($x)\n", b"query(escape($x))\n"),
            changed("gone.php", ChangeType::Deleted, b"old"),
        ]);

        let report = w.commit(&record(), &d).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.pre_images, 1);
        assert!(report.patch_written);

        let dir = tmp.path().join("2099/CVE-2099-0001");
        assert_eq!(std::fs::read(dir.join("q.php")).unwrap(), b"query(escape($x))\n");
        assert_eq!(std::fs::read(dir.join(PRE_IMAGE_DIR).join("q.php")).unwrap(), b"query($x)\n");
        assert!(!dir.join(PRE_IMAGE_DIR).join("gone.php").exists());

        let manifest = Manifest::load(&dir).await.unwrap();
        assert_eq!(manifest.files[0].pre_stored_filename.as_deref(), Some("pre/q.php"));
        assert_eq!(manifest.files[0].pre_sha256.as_deref(), Some(sha256_hex(b"query($x)\n").as_str()));
        assert!(manifest.files[1].pre_stored_filename.is_none());

        let patch = std::fs::read_to_string(dir.join(PATCH_FILE)).unwrap();
        assert!(patch.contains("-query($x)\n+query(escape($x))\n"));

        let again = w.commit(&record(), &d).await.unwrap();
        assert!(!again.changed());
    }

    #[tokio::test]
    async fn test_stale_pre_images_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        w.commit(&record(), &diff("c1", vec![modified("a.c", b"v0", b"v1")])).await.unwrap();
        let dir = tmp.path().join("2099/CVE-2099-0001");
        assert!(dir.join("pre/a.c").exists());

        let report = w
            .commit(&record(), &diff("c2", vec![changed("b.c", ChangeType::Added, b"b")]))
            .await
            .unwrap();
        assert_eq!(report.removed, 2);
        assert!(!dir.join("a.c").exists());
        assert!(!dir.join(PRE_IMAGE_DIR).exists());
    }

    #[test]
    fn test_recorded_paths_stay_inside_entry() {
        let dir = Path::new("/corpus/2099/CVE-2099-0001");
        assert_eq!(recorded_path(dir, "a.c"), Some(dir.join("a.c")));
        assert_eq!(recorded_path(dir, "pre/a.c"), Some(dir.join("pre").join("a.c")));
        assert_eq!(recorded_path(dir, "../x"), None);
        assert_eq!(recorded_path(dir, "pre/../x"), None);
        assert_eq!(recorded_path(dir, "pre/.."), None);
        assert_eq!(recorded_path(dir, MANIFEST_FILE), None);
        assert_eq!(recorded_path(dir, PATCH_FILE), None);
        assert_eq!(recorded_path(dir, PRE_IMAGE_DIR), None);
    }

    #[tokio::test]
    async fn test_rewrite_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let d = diff("c1", vec![changed("a.c", ChangeType::Modified, b"x")]);
        w.commit(&record(), &d).await.unwrap();
        let manifest_path = tmp.path().join("2099/CVE-2099-0001").join(MANIFEST_FILE);
        let before = std::fs::read(&manifest_path).unwrap();

        let report = w.commit(&record(), &d).await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(!report.changed());
        assert_eq!(std::fs::read(&manifest_path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_changed_content_overwrites_and_drops_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        w.commit(&record(), &diff("c1", vec![
            changed("a.c", ChangeType::Modified, b"v1"),
            changed("b.c", ChangeType::Modified, b"b"),
        ])).await.unwrap();

        let report = w
            .commit(&record(), &diff("c2", vec![changed("a.c", ChangeType::Modified, b"v2")]))
            .await
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);

        let dir = tmp.path().join("2099/CVE-2099-0001");
        let mut names: Vec<_> = std::fs::read_dir(&dir).unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![PATCH_FILE.to_string(), MANIFEST_FILE.to_string(), "a.c".to_string()]);
        assert_eq!(std::fs::read(dir.join("a.c")).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_new_commit_same_content_rewrites_manifest_only() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        w.commit(&record(), &diff("c1", vec![changed("a.c", ChangeType::Modified, b"x")])).await.unwrap();
        let report = w.commit(&record(), &diff("c9", vec![changed("a.c", ChangeType::Modified, b"x")])).await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(report.manifest_written);
    }

    #[tokio::test]
    async fn test_skipped_files_not_written() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let mut skipped = changed("logo.png", ChangeType::Added, b"\x00");
        skipped.skipped = Some(crate::errors::ExtractError::BinaryFile { path: "logo.png".into() });
        let d = diff("c1", vec![skipped, changed("a.c", ChangeType::Added, b"x")]);

        let report = w.commit(&record(), &d).await.unwrap();
        assert_eq!(report.created, 1);
        assert!(!tmp.path().join("2099/CVE-2099-0001/logo.png").exists());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.txt");
        atomic_write(&target, b"one").await.unwrap();
        atomic_write(&target, b"two").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"two");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}

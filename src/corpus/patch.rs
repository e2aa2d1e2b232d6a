use similar::TextDiff;

use crate::models::{ChangeType, ChangedFile, CommitDiff};

/// Unified diff of the stored files, kept next to them in the entry directory.
pub const PATCH_FILE: &str = ".diff";

const CONTEXT_LINES: usize = 3;

/// Render the git-style patch of every storable file of `diff`.
///
/// The patch is rebuilt from the fetched images, so skipped files are absent
/// and a modified file whose pre-image could not be fetched shows as added.
pub fn render_patch(diff: &CommitDiff) -> String {
    diff.storable_files().map(render_file).collect()
}

fn render_file(file: &ChangedFile) -> String {
    let old_path = file.previous_path.as_deref().unwrap_or(&file.path);
    let old = match file.change_type {
        ChangeType::Added => None,
        _ => file.pre_image.as_deref(),
    };
    let new = match file.change_type {
        ChangeType::Deleted => None,
        _ => file.post_image.as_deref(),
    };

    let mut out = format!("diff --git a/{} b/{}\n", old_path, file.path);
    match (old, new) {
        (None, Some(_)) => out.push_str("new file mode 100644\n"),
        (Some(_), None) => out.push_str("deleted file mode 100644\n"),
        _ => {}
    }
    if file.change_type == ChangeType::Renamed && old_path != file.path {
        out.push_str(&format!("rename from {}\nrename to {}\n", old_path, file.path));
    }

    let old_text = old.map(String::from_utf8_lossy).unwrap_or_default();
    let new_text = new.map(String::from_utf8_lossy).unwrap_or_default();
    let old_header = old.map_or_else(|| "/dev/null".to_string(), |_| format!("a/{}", old_path));
    let new_header = new.map_or_else(|| "/dev/null".to_string(), |_| format!("b/{}", file.path));

    let text_diff = TextDiff::from_lines(&*old_text, &*new_text);
    out.push_str(
        &text_diff
            .unified_diff()
            .context_radius(CONTEXT_LINES)
            .header(&old_header, &new_header)
            .to_string(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExtractError;
    use crate::models::{ForgeKind, Provider, RepoRef};

    fn file(path: &str, change_type: ChangeType, pre: Option<&str>, post: Option<&str>) -> ChangedFile {
        ChangedFile {
            path: path.into(),
            previous_path: None,
            change_type,
            pre_image_blob: None,
            post_image_blob: None,
            pre_image: pre.map(|s| s.as_bytes().to_vec()),
            post_image: post.map(|s| s.as_bytes().to_vec()),
            skipped: None,
        }
    }

    fn commit(files: Vec<ChangedFile>) -> CommitDiff {
        CommitDiff {
            commit: "c1".into(),
            repo: RepoRef::new(Provider::new(ForgeKind::GitHub, "github.com"), "acme/web"),
            base_parent: Some("p".into()),
            files,
        }
    }

    #[test]
    fn test_modified_file_hunk() {
        let patch = render_patch(&commit(vec![file(
            "src/q.php",
            ChangeType::Modified,
            Some("a\nquery($x)\nb\n"),
            Some("a\nquery(escape($x))\nb\n"),
        )]));
        assert!(patch.starts_with("diff --git a/src/q.php b/src/q.php\n--- a/src/q.php\n+++ b/src/q.php\n"));
        assert!(patch.contains("-query($x)\n"));
        assert!(patch.contains("+query(escape($x))\n"));
    }

    #[test]
    fn test_added_and_deleted_use_dev_null() {
        let patch = render_patch(&commit(vec![
            file("new.c", ChangeType::Added, None, Some("int x;\n")),
            file("old.c", ChangeType::Deleted, Some("int y;\n"), None),
        ]));
        assert!(patch.contains("new file mode 100644\n--- /dev/null\n+++ b/new.c\n"));
        assert!(patch.contains("deleted file mode 100644\n--- a/old.c\n+++ /dev/null\n"));
        assert!(patch.contains("+int x;\n"));
        assert!(patch.contains("-int y;\n"));
    }

    #[test]
    fn test_rename_headers() {
        let mut moved = file("lib/r.js", ChangeType::Renamed, Some("x\n"), Some("y\n"));
        moved.previous_path = Some("src/r.js".into());
        let patch = render_patch(&commit(vec![moved]));
        assert!(patch.starts_with("diff --git a/src/r.js b/lib/r.js\nrename from src/r.js\nrename to lib/r.js\n"));
        assert!(patch.contains("--- a/src/r.js\n+++ b/lib/r.js\n"));
    }

    #[test]
    fn test_skipped_files_left_out() {
        let mut binary = file("logo.png", ChangeType::Added, None, Some("x"));
        binary.skipped = Some(ExtractError::BinaryFile { path: "logo.png".into() });
        let patch = render_patch(&commit(vec![binary, file("a.c", ChangeType::Added, None, Some("a\n"))]));
        assert!(!patch.contains("logo.png"));
        assert!(patch.contains("b/a.c"));
    }
}

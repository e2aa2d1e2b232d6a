use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::manifest::{MANIFEST_FILE, PRE_IMAGE_DIR};
use super::patch::PATCH_FILE;

/// Names inside an entry directory that harvested files may not take.
const RESERVED_NAMES: [&str; 3] = [MANIFEST_FILE, PATCH_FILE, PRE_IMAGE_DIR];

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Final path segment of a repository path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `<stem>-<8 hex of sha256(path)>.<ext>`; a leading dot does not start an extension.
pub fn disambiguated_name(path: &str) -> String {
    let name = basename(path);
    let tag = &sha256_hex(path.as_bytes())[..8];
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, tag, ext),
        _ => format!("{}-{}", name, tag),
    }
}

/// Stored file names for the paths of one commit, in input order.
///
/// A basename shared by two or more paths, or equal to a reserved name, is
/// disambiguated for every path carrying it; unique basenames are kept as-is.
pub fn assign_filenames<'a>(paths: impl IntoIterator<Item = &'a str> + Clone) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for path in paths.clone() {
        *counts.entry(basename(path)).or_insert(0) += 1;
    }
    paths
        .into_iter()
        .map(|path| {
            let name = basename(path);
            if counts.get(name).copied().unwrap_or(0) > 1 || RESERVED_NAMES.contains(&name) {
                disambiguated_name(path)
            } else {
                name.to_string()
            }
        })
        .collect()
}

/// Make an identifier safe to use as a single directory name.
pub fn path_component(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_basenames_kept() {
        let names = assign_filenames(["src/a.c", "lib/b.c"]);
        assert_eq!(names, vec!["a.c", "b.c"]);
    }

    #[test]
    fn test_colliding_basenames_disambiguated() {
        let names = assign_filenames(["a/index.php", "b/index.php", "c/other.php"]);
        assert_ne!(names[0], names[1]);
        assert!(names[0].starts_with("index-") && names[0].ends_with(".php"));
        assert_eq!(names[0].len(), "index-".len() + 8 + ".php".len());
        assert_eq!(names[2], "other.php");
    }

    #[test]
    fn test_disambiguation_is_deterministic() {
        assert_eq!(disambiguated_name("a/index.php"), disambiguated_name("a/index.php"));
        assert_eq!(
            disambiguated_name("a/index.php"),
            format!("index-{}.php", &sha256_hex(b"a/index.php")[..8])
        );
    }

    #[test]
    fn test_dotfiles_and_extensionless() {
        assert!(disambiguated_name("x/.htaccess").starts_with(".htaccess-"));
        assert!(disambiguated_name("x/Makefile").starts_with("Makefile-"));
        assert!(disambiguated_name("x/archive.tar.gz").ends_with(".gz"));
    }

    #[test]
    fn test_reserved_names_disambiguated() {
        let names = assign_filenames(["docs/.manifest.json", "patches/.diff", "bin/pre"]);
        assert_ne!(names[0], MANIFEST_FILE);
        assert!(names[1].starts_with(".diff-"));
        assert!(names[2].starts_with("pre-"));
    }

    #[test]
    fn test_path_component_sanitized() {
        assert_eq!(path_component("CVE-2099-0001"), "CVE-2099-0001");
        assert_eq!(path_component("GHSA/abc"), "GHSA_abc");
        assert_eq!(path_component(".."), "_");
    }
}

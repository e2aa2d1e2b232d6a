use regex::Regex;
use std::sync::OnceLock;

/// Path shapes of links that point at a fix. Matched against the URL path only.
pub(crate) struct ReferencePatterns {
    pub gitlab_commit: Regex,
    pub gitlab_merge_request: Regex,
    pub pull_commit: Regex,
    pub commit: Regex,
    pub pull: Regex,
    pub legacy_merge_request: Regex,
}

const SHA: &str = r"(?P<sha>[0-9a-fA-F]{7,64})(?:\.(?:patch|diff))?/?";

impl ReferencePatterns {
    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            gitlab_commit: Regex::new(&format!(r"^/(?P<repo>.+?)/-/commit/{}$", SHA))?,
            gitlab_merge_request: Regex::new(r"^/(?P<repo>.+?)/-/merge_requests/(?P<num>\d+)(?:/.*)?$")?,
            pull_commit: Regex::new(&format!(
                r"^/(?P<repo>[^/]+/[^/]+)/pulls?/(?P<num>\d+)/commits/{}$",
                SHA
            ))?,
            commit: Regex::new(&format!(r"^/(?P<repo>[^/]+(?:/[^/]+)+?)/commits?/{}$", SHA))?,
            pull: Regex::new(r"^/(?P<repo>[^/]+/[^/]+)/pulls?/(?P<num>\d+)(?:/.*)?$")?,
            legacy_merge_request: Regex::new(r"^/(?P<repo>[^/]+(?:/[^/]+)+?)/merge_requests/(?P<num>\d+)(?:/.*)?$")?,
        })
    }

    pub fn get() -> &'static ReferencePatterns {
        static PATTERNS: OnceLock<ReferencePatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self::build().expect("reference patterns are valid regexes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        assert!(ReferencePatterns::build().is_ok());
    }

    #[test]
    fn test_commit_pattern_takes_first_commit_segment() {
        let caps = ReferencePatterns::get().commit.captures("/owner/repo/commit/abcdef1").unwrap();
        assert_eq!(&caps["repo"], "owner/repo");
        assert_eq!(&caps["sha"], "abcdef1");
    }

    #[test]
    fn test_sha_suffixes_stripped() {
        let p = ReferencePatterns::get();
        let caps = p.commit.captures("/o/r/commit/0123456789abcdef.patch").unwrap();
        assert_eq!(&caps["sha"], "0123456789abcdef");
        assert!(p.commit.is_match("/o/r/commit/0123456789abcdef/"));
    }

    #[test]
    fn test_short_or_non_hex_sha_rejected() {
        let p = ReferencePatterns::get();
        assert!(!p.commit.is_match("/o/r/commit/abc12"));
        assert!(!p.commit.is_match("/o/r/commit/master"));
    }
}

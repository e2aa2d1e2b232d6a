//! Turns a record's free-form reference URLs into typed candidate commits.
//!
//! Candidates come out of [`Candidates`] in published order with a stable
//! partition: every Direct (commit link) candidate first, then every Indirect
//! (pull/merge request) candidate. The iterator is lazy and can be restarted
//! by cloning it or calling [`ReferenceResolver::resolve`] again.

mod patterns;

use std::collections::{HashMap, HashSet};
use reqwest::Url;
use tracing::debug;

use crate::errors::FetchError;
use crate::fetch::RateLimitedFetcher;
use crate::models::{
    CandidateReference, Commitish, Confidence, ForgeKind, Provider, RepoRef, VulnerabilityRecord,
};
use patterns::ReferencePatterns;

/// A reference URL that matched a known shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub repo: RepoRef,
    pub commitish: Commitish,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceResolver {
    host_kinds: HashMap<String, ForgeKind>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the API dialect of a self-hosted forge whose links do not
    /// reveal it.
    pub fn with_host_kind(mut self, host: &str, kind: ForgeKind) -> Self {
        self.host_kinds.insert(host.to_ascii_lowercase(), kind);
        self
    }

    fn kind_for_host(&self, host: &str) -> ForgeKind {
        if let Some(kind) = self.host_kinds.get(host) {
            return *kind;
        }
        if host.contains("gitlab") {
            ForgeKind::GitLab
        } else {
            ForgeKind::GitHub
        }
    }

    pub fn parse_url(&self, raw: &str) -> Option<ParsedReference> {
        let url = Url::parse(raw.trim()).ok()?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let path = url.path();
        let p = ReferencePatterns::get();

        let gitlab = |repo: &str| RepoRef::new(Provider::new(ForgeKind::GitLab, &host), repo);
        let by_host = |repo: &str| RepoRef::new(Provider::new(self.kind_for_host(&host), &host), repo);

        if let Some(c) = p.gitlab_commit.captures(path) {
            return Some(direct(gitlab(&c["repo"]), &c["sha"]));
        }
        if let Some(c) = p.gitlab_merge_request.captures(path) {
            return indirect(gitlab(&c["repo"]), &c["num"]);
        }
        if let Some(c) = p.pull_commit.captures(path) {
            return Some(direct(by_host(&c["repo"]), &c["sha"]));
        }
        if let Some(c) = p.commit.captures(path) {
            return Some(direct(by_host(&c["repo"]), &c["sha"]));
        }
        if let Some(c) = p.pull.captures(path) {
            return indirect(by_host(&c["repo"]), &c["num"]);
        }
        if let Some(c) = p.legacy_merge_request.captures(path) {
            return indirect(gitlab(&c["repo"]), &c["num"]);
        }
        None
    }

    pub fn resolve<'a>(&'a self, record: &'a VulnerabilityRecord) -> Candidates<'a> {
        Candidates {
            resolver: self,
            record,
            pass: Confidence::Direct,
            index: 0,
            seen: HashSet::new(),
        }
    }

    /// Commit a candidate stands for. Indirect candidates cost one API call.
    pub async fn commit_for(
        &self,
        candidate: &CandidateReference,
        fetcher: &RateLimitedFetcher,
    ) -> Result<String, FetchError> {
        match &candidate.commitish {
            Commitish::Commit(sha) => Ok(sha.clone()),
            Commitish::PullRequest(number) => {
                let sha = fetcher.resolve_pull_request_head(&candidate.repo, *number).await?;
                debug!(
                    record = %candidate.record_id,
                    repo = %candidate.repo,
                    number,
                    commit = %sha,
                    "Resolved pull request to commit"
                );
                Ok(sha)
            }
        }
    }
}

fn direct(repo: RepoRef, sha: &str) -> ParsedReference {
    ParsedReference {
        repo,
        commitish: Commitish::Commit(sha.to_ascii_lowercase()),
        confidence: Confidence::Direct,
    }
}

fn indirect(repo: RepoRef, number: &str) -> Option<ParsedReference> {
    Some(ParsedReference {
        repo,
        commitish: Commitish::PullRequest(number.parse().ok()?),
        confidence: Confidence::Indirect,
    })
}

/// Lazy two-pass walk over a record's references.
#[derive(Clone)]
pub struct Candidates<'a> {
    resolver: &'a ReferenceResolver,
    record: &'a VulnerabilityRecord,
    pass: Confidence,
    index: usize,
    seen: HashSet<(RepoRef, Commitish)>,
}

impl Iterator for Candidates<'_> {
    type Item = CandidateReference;

    fn next(&mut self) -> Option<CandidateReference> {
        loop {
            let Some(url) = self.record.reference_urls.get(self.index) else {
                match self.pass {
                    Confidence::Direct => {
                        self.pass = Confidence::Indirect;
                        self.index = 0;
                        continue;
                    }
                    Confidence::Indirect => return None,
                }
            };
            self.index += 1;

            let Some(parsed) = self.resolver.parse_url(url) else {
                if self.pass == Confidence::Direct {
                    debug!(record = %self.record.id, url = %url, "Dropping unrecognised reference");
                }
                continue;
            };
            if parsed.confidence != self.pass {
                continue;
            }
            if !self.seen.insert((parsed.repo.clone(), parsed.commitish.clone())) {
                continue;
            }

            return Some(CandidateReference {
                record_id: self.record.id.clone(),
                repo: parsed.repo,
                commitish: parsed.commitish,
                confidence: parsed.confidence,
                source_url: url.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(urls: &[&str]) -> VulnerabilityRecord {
        VulnerabilityRecord::new("CVE-2099-0001", 2099, urls.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_github_commit_is_direct() {
        let parsed = ReferenceResolver::new()
            .parse_url("https://github.com/owner/repo/commit/DEADBEEF#diff-1")
            .unwrap();
        assert_eq!(parsed.confidence, Confidence::Direct);
        assert_eq!(parsed.commitish, Commitish::Commit("deadbeef".into()));
        assert_eq!(parsed.repo.path, "owner/repo");
        assert_eq!(parsed.repo.provider.kind, ForgeKind::GitHub);
    }

    #[test]
    fn test_arbitrary_host_commit() {
        let parsed = ReferenceResolver::new()
            .parse_url("https://hostA/owner/repo/commit/deadbeef")
            .unwrap();
        assert_eq!(parsed.repo.provider.host, "hosta");
        assert_eq!(parsed.commitish, Commitish::Commit("deadbeef".into()));
    }

    #[test]
    fn test_gitlab_nested_group_commit() {
        let parsed = ReferenceResolver::new()
            .parse_url("https://gitlab.com/group/sub/project/-/commit/0123abcd.diff")
            .unwrap();
        assert_eq!(parsed.repo.provider.kind, ForgeKind::GitLab);
        assert_eq!(parsed.repo.path, "group/sub/project");
        assert_eq!(parsed.commitish, Commitish::Commit("0123abcd".into()));
    }

    #[test]
    fn test_pull_and_merge_requests_are_indirect() {
        let resolver = ReferenceResolver::new();
        let pr = resolver.parse_url("https://github.com/o/r/pull/42/files").unwrap();
        assert_eq!(pr.confidence, Confidence::Indirect);
        assert_eq!(pr.commitish, Commitish::PullRequest(42));

        let mr = resolver.parse_url("https://gitlab.com/g/p/-/merge_requests/7").unwrap();
        assert_eq!(mr.confidence, Confidence::Indirect);
        assert_eq!(mr.repo.provider.kind, ForgeKind::GitLab);
        assert_eq!(mr.commitish, Commitish::PullRequest(7));
    }

    #[test]
    fn test_commit_inside_pull_request_is_direct() {
        let parsed = ReferenceResolver::new()
            .parse_url("https://github.com/o/r/pull/42/commits/abcdef12")
            .unwrap();
        assert_eq!(parsed.confidence, Confidence::Direct);
        assert_eq!(parsed.repo.path, "o/r");
    }

    #[test]
    fn test_host_kind_override() {
        let resolver = ReferenceResolver::new().with_host_kind("git.example.org", ForgeKind::GitLab);
        let parsed = resolver.parse_url("https://git.example.org/team/app/commit/abcdef12").unwrap();
        assert_eq!(parsed.repo.provider.kind, ForgeKind::GitLab);
    }

    #[test]
    fn test_unrelated_urls_dropped() {
        let resolver = ReferenceResolver::new();
        assert!(resolver.parse_url("https://nvd.nist.gov/vuln/detail/CVE-2099-0001").is_none());
        assert!(resolver.parse_url("https://github.com/o/r/issues/5").is_none());
        assert!(resolver.parse_url("ftp://github.com/o/r/commit/abcdef12").is_none());
        assert!(resolver.parse_url("not a url").is_none());
    }

    #[test]
    fn test_direct_partitioned_before_indirect() {
        let resolver = ReferenceResolver::new();
        let rec = record(&[
            "https://github.com/o/r/pull/1",
            "https://example.com/advisory",
            "https://github.com/o/r/commit/aaaaaaa1",
            "https://gitlab.com/g/p/-/merge_requests/2",
            "https://github.com/o/r/commit/bbbbbbb2",
        ]);
        let got: Vec<_> = resolver.resolve(&rec).map(|c| (c.confidence, c.commitish)).collect();
        assert_eq!(
            got,
            vec![
                (Confidence::Direct, Commitish::Commit("aaaaaaa1".into())),
                (Confidence::Direct, Commitish::Commit("bbbbbbb2".into())),
                (Confidence::Indirect, Commitish::PullRequest(1)),
                (Confidence::Indirect, Commitish::PullRequest(2)),
            ]
        );
    }

    #[test]
    fn test_duplicates_yielded_once() {
        let resolver = ReferenceResolver::new();
        let rec = record(&[
            "https://github.com/o/r/commit/aaaaaaa1",
            "https://github.com/o/r/commit/AAAAAAA1.patch",
        ]);
        assert_eq!(resolver.resolve(&rec).count(), 1);
    }

    #[test]
    fn test_restartable() {
        let resolver = ReferenceResolver::new();
        let rec = record(&["https://github.com/o/r/commit/aaaaaaa1", "https://github.com/o/r/pull/3"]);
        let candidates = resolver.resolve(&rec);
        let first: Vec<_> = candidates.clone().collect();
        let second: Vec<_> = candidates.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].record_id, "CVE-2099-0001");
    }

    #[test]
    fn test_no_references_no_candidates() {
        let resolver = ReferenceResolver::new();
        assert_eq!(resolver.resolve(&record(&[])).count(), 0);
    }
}

use serde::{Deserialize, Serialize};

/// API dialect spoken by a code-hosting site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    GitHub,
    GitLab,
}

impl ForgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }
}

impl std::fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    pub kind: ForgeKind,
    /// Lowercased host name as it appears in reference URLs.
    pub host: String,
}

impl Provider {
    pub fn new(kind: ForgeKind, host: &str) -> Self {
        Self { kind, host: host.to_ascii_lowercase() }
    }

    /// Identity of the upstream API; calls sharing a key share one rate-limit bucket.
    pub fn bucket_key(&self) -> &str {
        &self.host
    }
}

/// A repository on a specific provider, e.g. `github.com` + `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub provider: Provider,
    pub path: String,
}

impl RepoRef {
    pub fn new(provider: Provider, path: &str) -> Self {
        Self { provider, path: path.trim_matches('/').to_string() }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider.host, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Commitish {
    Commit(String),
    /// Pull request (GitHub) or merge request (GitLab) number.
    PullRequest(u64),
}

impl std::fmt::Display for Commitish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commit(sha) => f.write_str(sha),
            Self::PullRequest(n) => write!(f, "#{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Link points at a commit.
    Direct,
    /// Link points at a pull/merge request; its head commit is used.
    Indirect,
}

/// A parsed, typed pointer to a possible fixing commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateReference {
    pub record_id: String,
    pub repo: RepoRef,
    pub commitish: Commitish,
    pub confidence: Confidence,
    pub source_url: String,
}

impl CandidateReference {
    pub fn provider(&self) -> &Provider {
        &self.repo.provider
    }
}

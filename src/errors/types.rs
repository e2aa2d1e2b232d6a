use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure of one call against the code-hosting API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {detail}")]
    RateLimited {
        reset_at: Option<DateTime<Utc>>,
        detail: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Server error ({status}): {detail}")]
    ServerError { status: u16, detail: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    /// A success response whose body does not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Why a record ended Unresolved.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no reference URL matched a known commit or pull request shape")]
    NoCandidates,

    #[error("every candidate reference failed")]
    AllCandidatesExhausted,
}

impl ResolveError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCandidates => "NoCandidates",
            Self::AllCandidatesExhausted => "AllCandidatesExhausted",
        }
    }
}

/// Per-file skip reasons. These never fail a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported change shape for {path}: {detail}")]
    UnsupportedCommitShape { path: String, detail: String },

    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    BlobTooLarge { path: String, size: u64, limit: u64 },

    #[error("{path} is binary")]
    BinaryFile { path: String },
}

/// Failure of one candidate attempt. Advances the orchestrator to the next candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("commit {commit} has no storable files")]
    NoStorableFiles { commit: String },

    #[error("Harvest cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Disk full while writing {0}")]
    DiskFull(String),

    #[error("Permission denied writing {0}")]
    PermissionDenied(String),

    #[error("IO error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),
}

impl WriteError {
    pub fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        let display = path.display().to_string();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => WriteError::PermissionDenied(display),
            std::io::ErrorKind::StorageFull => WriteError::DiskFull(display),
            _ => WriteError::Io { path: display, source },
        }
    }

    /// The output environment itself is broken; the run cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WriteError::DiskFull(_) | WriteError::PermissionDenied(_))
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Startup check failed: {0}")]
    Preflight(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Harvest cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for HarvestError {
    fn from(e: rusqlite::Error) -> Self {
        HarvestError::Store(e.to_string())
    }
}

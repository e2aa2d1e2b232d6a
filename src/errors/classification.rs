use super::types::{AttemptError, FetchError, HarvestError, WriteError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

/// Errors that can tell whether repeating the operation may succeed.
pub trait Classify {
    fn classify(&self) -> ErrorClassification;
}

impl Classify for FetchError {
    fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors
            FetchError::RateLimited { .. } => ErrorClassification {
                error_type: "RateLimitError",
                retryable: true,
            },
            FetchError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                retryable: true,
            },
            FetchError::ServerError { .. } => ErrorClassification {
                error_type: "ServerError",
                retryable: true,
            },
            FetchError::NetworkError(_) => ErrorClassification {
                error_type: "NetworkError",
                retryable: true,
            },

            // Non-retryable errors
            FetchError::NotFound(_) => ErrorClassification {
                error_type: "NotFound",
                retryable: false,
            },
            FetchError::Forbidden(_) => ErrorClassification {
                error_type: "Forbidden",
                retryable: false,
            },
            FetchError::InvalidResponse(_) => ErrorClassification {
                error_type: "InvalidResponse",
                retryable: false,
            },
        }
    }
}

impl Classify for AttemptError {
    fn classify(&self) -> ErrorClassification {
        match self {
            AttemptError::Fetch(e) => e.classify(),
            AttemptError::NoStorableFiles { .. } => ErrorClassification {
                error_type: "NoStorableFiles",
                retryable: false,
            },
            AttemptError::Cancelled => ErrorClassification {
                error_type: "Cancelled",
                retryable: false,
            },
        }
    }
}

impl Classify for WriteError {
    fn classify(&self) -> ErrorClassification {
        let error_type = match self {
            WriteError::DiskFull(_) => "DiskFull",
            WriteError::PermissionDenied(_) => "PermissionDenied",
            WriteError::Io { .. } => "IoError",
            WriteError::Manifest(_) => "ManifestError",
        };
        ErrorClassification { error_type, retryable: false }
    }
}

impl Classify for HarvestError {
    fn classify(&self) -> ErrorClassification {
        match self {
            HarvestError::Fetch(e) => e.classify(),
            HarvestError::Write(e) => e.classify(),
            HarvestError::Store(_) => ErrorClassification {
                error_type: "StoreError",
                retryable: false,
            },
            HarvestError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            HarvestError::Feed(_) => ErrorClassification {
                error_type: "FeedError",
                retryable: false,
            },
            HarvestError::Preflight(_) => ErrorClassification {
                error_type: "PreflightError",
                retryable: false,
            },
            HarvestError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: false,
            },
            HarvestError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            HarvestError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            HarvestError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: false,
            },
            HarvestError::Cancelled => ErrorClassification {
                error_type: "Cancelled",
                retryable: false,
            },
        }
    }
}

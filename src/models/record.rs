use serde::{Deserialize, Serialize};

/// Progress of a vulnerability record through the harvester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Resolved,
    Unresolved,
    Failed,
}

impl RecordStatus {
    /// Terminal records are not revisited unless a force-refresh is requested.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Unresolved => "unresolved",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "unresolved" => Some(Self::Unresolved),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One disclosed issue with its published reference links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub id: String,
    #[serde(rename = "year")]
    pub disclosure_year: i32,
    #[serde(rename = "references", default)]
    pub reference_urls: Vec<String>,
    #[serde(skip, default = "pending")]
    pub status: RecordStatus,
}

fn pending() -> RecordStatus {
    RecordStatus::Pending
}

impl VulnerabilityRecord {
    pub fn new(id: &str, disclosure_year: i32, reference_urls: Vec<String>) -> Self {
        Self {
            id: id.trim().to_string(),
            disclosure_year,
            reference_urls,
            status: RecordStatus::Pending,
        }
    }
}

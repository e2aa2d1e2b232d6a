pub mod orchestrator;
pub mod report;

pub use orchestrator::{HarvestOptions, HarvestOrchestrator};
pub use report::{FailedRecord, FileCounts, HarvestReport};

use tracing::info;

use crate::errors::HarvestError;
use crate::fetch::CodeHostApi;
use crate::models::Provider;

/// Startup reachability check for every provider the run expects to talk to.
pub async fn preflight(api: &dyn CodeHostApi, providers: &[Provider]) -> Result<(), HarvestError> {
    for provider in providers {
        api.check_reachable(provider)
            .await
            .map_err(|e| HarvestError::Preflight(format!("{} is unreachable: {}", provider.host, e)))?;
        info!(host = %provider.host, kind = %provider.kind, "API reachable");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::fetch::InMemoryCodeHost;
    use crate::fetch::CommitPage;
    use crate::models::{ForgeKind, RepoRef};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl CodeHostApi for Offline {
        async fn get_commit_page(&self, _repo: &RepoRef, _sha: &str, _page: u32) -> Result<CommitPage, FetchError> {
            Err(FetchError::NetworkError("offline".into()))
        }

        async fn get_file_at_ref(&self, _repo: &RepoRef, _reference: &str, _path: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::NetworkError("offline".into()))
        }

        async fn resolve_pull_request_head(&self, _repo: &RepoRef, _number: u64) -> Result<String, FetchError> {
            Err(FetchError::NetworkError("offline".into()))
        }

        async fn check_reachable(&self, _provider: &Provider) -> Result<(), FetchError> {
            Err(FetchError::NetworkError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_preflight() {
        let providers = [Provider::new(ForgeKind::GitHub, "github.com")];
        assert!(preflight(&InMemoryCodeHost::new(), &providers).await.is_ok());

        let err = preflight(&Offline, &providers).await.unwrap_err();
        assert!(matches!(err, HarvestError::Preflight(ref msg) if msg.contains("github.com")));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::errors::{FetchError, HarvestError};
use crate::models::{ForgeKind, Provider, RepoRef};
use super::api::{CodeHostApi, CommitPage};
use super::github::GitHubClient;
use super::gitlab::GitLabClient;

/// API endpoint for one code-hosting site.
#[derive(Debug, Clone)]
pub struct HostEndpoint {
    pub host: String,
    pub kind: ForgeKind,
    pub api_base: Url,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
    pub hosts: Vec<HostEndpoint>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            github_token: None,
            gitlab_token: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("cvefix-harvest/{}", env!("CARGO_PKG_VERSION")),
            hosts: Vec::new(),
        }
    }
}

/// [`CodeHostApi`] over HTTP, speaking GitHub REST v3 or GitLab REST v4
/// depending on the provider of each repository.
pub struct HttpCodeHost {
    client: Client,
    settings: HttpSettings,
}

impl HttpCodeHost {
    pub fn new(settings: HttpSettings) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    pub fn endpoint_for(&self, provider: &Provider) -> Result<HostEndpoint, FetchError> {
        if let Some(configured) = self.settings.hosts.iter().find(|h| h.host == provider.host) {
            return Ok(configured.clone());
        }

        let base = match (provider.kind, provider.host.as_str()) {
            (ForgeKind::GitHub, "github.com") => "https://api.github.com".to_string(),
            (ForgeKind::GitHub, host) => format!("https://{}/api/v3", host),
            (ForgeKind::GitLab, host) => format!("https://{}/api/v4", host),
        };
        let api_base = Url::parse(&base)
            .map_err(|e| FetchError::NetworkError(format!("Invalid API base {}: {}", base, e)))?;

        let token = match (provider.kind, provider.host.as_str()) {
            (ForgeKind::GitHub, "github.com") => self.settings.github_token.clone(),
            (ForgeKind::GitLab, "gitlab.com") => self.settings.gitlab_token.clone(),
            _ => None,
        };

        Ok(HostEndpoint {
            host: provider.host.clone(),
            kind: provider.kind,
            api_base,
            token,
        })
    }
}

#[async_trait]
impl CodeHostApi for HttpCodeHost {
    async fn get_commit_page(&self, repo: &RepoRef, sha: &str, page: u32) -> Result<CommitPage, FetchError> {
        let endpoint = self.endpoint_for(&repo.provider)?;
        match endpoint.kind {
            ForgeKind::GitHub => {
                GitHubClient::new(&self.client, &endpoint).get_commit_page(repo, sha, page).await
            }
            ForgeKind::GitLab => {
                GitLabClient::new(&self.client, &endpoint).get_commit_page(repo, sha, page).await
            }
        }
    }

    async fn get_file_at_ref(
        &self,
        repo: &RepoRef,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let endpoint = self.endpoint_for(&repo.provider)?;
        match endpoint.kind {
            ForgeKind::GitHub => {
                GitHubClient::new(&self.client, &endpoint).get_file_at_ref(repo, reference, path).await
            }
            ForgeKind::GitLab => {
                GitLabClient::new(&self.client, &endpoint).get_file_at_ref(repo, reference, path).await
            }
        }
    }

    async fn resolve_pull_request_head(&self, repo: &RepoRef, number: u64) -> Result<String, FetchError> {
        let endpoint = self.endpoint_for(&repo.provider)?;
        match endpoint.kind {
            ForgeKind::GitHub => {
                GitHubClient::new(&self.client, &endpoint).resolve_pull_request_head(repo, number).await
            }
            ForgeKind::GitLab => {
                GitLabClient::new(&self.client, &endpoint).resolve_merge_request_head(repo, number).await
            }
        }
    }

    /// Any HTTP answer counts as reachable; only transport failures fail the check.
    async fn check_reachable(&self, provider: &Provider) -> Result<(), FetchError> {
        let endpoint = self.endpoint_for(provider)?;
        let resp = self
            .client
            .get(endpoint.api_base.clone())
            .send()
            .await
            .map_err(|e| map_transport_error(&endpoint.api_base, e))?;
        debug!(host = %provider.host, status = resp.status().as_u16(), "API answered reachability check");
        Ok(())
    }
}

/// Append path segments to an API base URL, percent-encoding each one.
pub(crate) fn api_url(base: &Url, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::NetworkError(format!("API base cannot take a path: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn map_transport_error(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(format!("{}: {}", url, e))
    } else {
        FetchError::NetworkError(format!("{}: {}", url, e))
    }
}

/// Decode a success body. A body that does not parse is a permanent
/// [`FetchError::InvalidResponse`]; a connection dropped mid-body stays a transport error.
pub(crate) async fn read_json(resp: reqwest::Response, url: &Url, what: &str) -> Result<Value, FetchError> {
    resp.json::<Value>().await.map_err(|e| {
        if e.is_decode() {
            FetchError::InvalidResponse(format!("Failed to parse {} response: {}", what, e))
        } else {
            map_transport_error(url, e)
        }
    })
}

/// Map a non-success response to a [`FetchError`]. Returns `None` for 2xx.
pub(crate) fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    what: &str,
    now: DateTime<Utc>,
) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    if is_rate_limited(status, headers) {
        return Some(FetchError::RateLimited {
            reset_at: rate_limit_reset(headers, now),
            detail: format!("{} ({})", what, status),
        });
    }
    let detail = format!("{} ({})", what, status);
    let err = match status.as_u16() {
        401 | 403 => FetchError::Forbidden(detail),
        404 | 410 | 422 | 451 => FetchError::NotFound(detail),
        408 | 504 => FetchError::Timeout(detail),
        s if s >= 500 => FetchError::ServerError { status: s, detail },
        _ => FetchError::NotFound(detail),
    };
    Some(err)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && (header_str(headers, "x-ratelimit-remaining") == Some("0")
            || header_str(headers, "retry-after").is_some())
}

/// Longest wait a server hint may impose.
const MAX_RESET_WAIT_SECS: i64 = 24 * 60 * 60;

/// Server reset hint: `Retry-After` seconds, or an epoch-seconds reset header.
/// Hints are capped at [`MAX_RESET_WAIT_SECS`] from `now`.
pub(crate) fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let latest = now.checked_add_signed(chrono::Duration::seconds(MAX_RESET_WAIT_SECS))?;
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.parse::<i64>().ok()) {
        let wait = chrono::Duration::try_seconds(secs.clamp(0, MAX_RESET_WAIT_SECS))?;
        return now.checked_add_signed(wait);
    }
    ["x-ratelimit-reset", "ratelimit-reset"]
        .iter()
        .filter_map(|name| header_str(headers, name))
        .filter_map(|v| v.parse::<i64>().ok())
        .find_map(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .map(|reset| reset.min(latest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_success_is_not_an_error() {
        assert!(classify_response(StatusCode::OK, &HeaderMap::new(), "x", Utc::now()).is_none());
    }

    #[test]
    fn test_github_primary_rate_limit() {
        let now = Utc.timestamp_opt(4_000_000_000, 0).unwrap();
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "4000000120")]);
        let err = classify_response(StatusCode::FORBIDDEN, &h, "commit", now).unwrap();
        assert_eq!(
            err,
            FetchError::RateLimited {
                reset_at: Some(now + chrono::Duration::seconds(120)),
                detail: "commit (403 Forbidden)".into(),
            }
        );
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let now = Utc.timestamp_opt(4_000_000_000, 0).unwrap();
        let h = headers(&[("retry-after", "30"), ("ratelimit-reset", "4000000999")]);
        assert_eq!(rate_limit_reset(&h, now), Some(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_oversized_reset_hints_capped() {
        let now = Utc.timestamp_opt(4_000_000_000, 0).unwrap();
        let cap = now + chrono::Duration::seconds(MAX_RESET_WAIT_SECS);

        let h = headers(&[("retry-after", "99999999999999")]);
        assert_eq!(rate_limit_reset(&h, now), Some(cap));

        let h = headers(&[("retry-after", &i64::MAX.to_string())]);
        assert_eq!(rate_limit_reset(&h, now), Some(cap));

        let h = headers(&[("retry-after", "-5")]);
        assert_eq!(rate_limit_reset(&h, now), Some(now));

        let h = headers(&[("x-ratelimit-reset", "253402300799")]);
        assert_eq!(rate_limit_reset(&h, now), Some(cap));

        let h = headers(&[("x-ratelimit-reset", &i64::MAX.to_string())]);
        assert_eq!(rate_limit_reset(&h, now), None);
    }

    #[test]
    fn test_plain_403_is_forbidden() {
        let err = classify_response(StatusCode::FORBIDDEN, &HeaderMap::new(), "x", Utc::now()).unwrap();
        assert!(matches!(err, FetchError::Forbidden(_)));
    }

    #[test]
    fn test_gone_and_missing_are_not_found() {
        for code in [404u16, 410, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = classify_response(status, &HeaderMap::new(), "x", Utc::now()).unwrap();
            assert!(matches!(err, FetchError::NotFound(_)), "{} should be NotFound", code);
        }
    }

    #[test]
    fn test_5xx_is_server_error() {
        let err = classify_response(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "x", Utc::now()).unwrap();
        assert!(matches!(err, FetchError::ServerError { status: 502, .. }));
    }

    #[test]
    fn test_api_url_encodes_segments() {
        let base = Url::parse("https://gitlab.example.org/api/v4").unwrap();
        let url = api_url(&base, &["projects", "group/sub/proj", "repository"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.org/api/v4/projects/group%2Fsub%2Fproj/repository"
        );
    }

    #[test]
    fn test_default_endpoints() {
        let host = HttpCodeHost::new(HttpSettings {
            github_token: Some("ghp_token".into()),
            ..Default::default()
        })
        .unwrap();

        let gh = host.endpoint_for(&Provider::new(ForgeKind::GitHub, "github.com")).unwrap();
        assert_eq!(gh.api_base.as_str(), "https://api.github.com/");
        assert_eq!(gh.token.as_deref(), Some("ghp_token"));

        let ghe = host.endpoint_for(&Provider::new(ForgeKind::GitHub, "git.corp.example")).unwrap();
        assert_eq!(ghe.api_base.as_str(), "https://git.corp.example/api/v3");
        assert!(ghe.token.is_none());

        let gl = host.endpoint_for(&Provider::new(ForgeKind::GitLab, "gitlab.com")).unwrap();
        assert_eq!(gl.api_base.as_str(), "https://gitlab.com/api/v4");
    }
}

pub mod credentials;
pub mod parser;
pub mod schema;
pub mod types;

pub use types::*;
pub use parser::{parse_config, parse_config_str};

use reqwest::Url;
use std::time::Duration;

use crate::errors::{HarvestError, RetryPolicy};
use crate::fetch::{BucketConfig, HostEndpoint, HttpSettings};
use credentials::{resolve_credential, token_or_env};

impl HarvesterConfig {
    pub fn bucket_config(&self) -> BucketConfig {
        self.rate_limit.as_ref().map(BucketConfig::from).unwrap_or_default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.as_ref().map(RetryPolicy::from).unwrap_or_default()
    }

    /// HTTP client settings with credentials resolved from config or the
    /// `GITHUB_TOKEN` / `GITLAB_TOKEN` environment.
    pub fn http_settings(&self) -> Result<HttpSettings, HarvestError> {
        let mut settings = HttpSettings::default();
        let creds = self.credentials.clone().unwrap_or_default();
        settings.github_token = token_or_env(creds.github_token.as_deref(), "GITHUB_TOKEN");
        settings.gitlab_token = token_or_env(creds.gitlab_token.as_deref(), "GITLAB_TOKEN");

        if let Some(http) = &self.http {
            if let Some(secs) = http.timeout_secs {
                settings.timeout = Duration::from_secs(secs);
            }
            if let Some(ua) = &http.user_agent {
                settings.user_agent = ua.clone();
            }
        }

        for host in self.hosts.iter().flatten() {
            let name = host.host.to_ascii_lowercase();
            let base = match &host.api_base {
                Some(b) => b.clone(),
                None => match host.kind {
                    crate::models::ForgeKind::GitHub => format!("https://{}/api/v3", name),
                    crate::models::ForgeKind::GitLab => format!("https://{}/api/v4", name),
                },
            };
            let api_base = Url::parse(&base)
                .map_err(|e| HarvestError::Config(format!("Invalid api_base for {}: {}", name, e)))?;
            settings.hosts.push(HostEndpoint {
                host: name,
                kind: host.kind,
                api_base,
                token: host.token.as_deref().and_then(resolve_credential),
            });
        }
        Ok(settings)
    }

    /// Every resolved secret, for log redaction.
    pub fn secrets(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(settings) = self.http_settings() {
            out.extend(settings.github_token);
            out.extend(settings.gitlab_token);
            out.extend(settings.hosts.into_iter().filter_map(|h| h.token));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ForgeKind;

    #[test]
    fn test_defaults_without_sections() {
        let config = HarvesterConfig::default();
        assert_eq!(config.bucket_config().capacity, BucketConfig::default().capacity);
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_host_endpoints_built() {
        let config = parse_config_str(
            "hosts:\n  - host: Git.Example.org\n    kind: gitlab\n  - host: ghe.corp\n    kind: github\n    api_base: https://ghe.corp/api/v3\n",
        )
        .unwrap();
        let settings = config.http_settings().unwrap();
        assert_eq!(settings.hosts.len(), 2);
        assert_eq!(settings.hosts[0].host, "git.example.org");
        assert_eq!(settings.hosts[0].api_base.as_str(), "https://git.example.org/api/v4");
        assert_eq!(settings.hosts[1].kind, ForgeKind::GitHub);
    }

    #[test]
    fn test_retry_and_rate_limit_sections() {
        let config = parse_config_str(
            "retry:\n  max_attempts: 2\n  base_delay_ms: 250\nrate_limit:\n  capacity: 3\n  refill_per_sec: 2.0\n  default_cooldown_secs: 30\n",
        )
        .unwrap();
        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        let bucket = config.bucket_config();
        assert_eq!(bucket.capacity, 3);
        assert_eq!(bucket.default_cooldown, Duration::from_secs(30));
    }
}

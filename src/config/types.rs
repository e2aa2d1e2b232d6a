use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::RetryPolicy;
use crate::fetch::BucketConfig;
use crate::models::ForgeKind;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HarvesterConfig {
    pub harvest: Option<HarvestSection>,
    pub rate_limit: Option<RateLimitConfig>,
    pub retry: Option<RetryConfig>,
    pub http: Option<HttpConfig>,
    pub credentials: Option<CredentialsConfig>,
    pub hosts: Option<Vec<HostConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HarvestSection {
    pub out: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub max_blob_bytes: Option<u64>,
    pub since: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill")]
    pub refill_per_sec: f64,
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,
}

fn default_capacity() -> u32 {
    BucketConfig::default().capacity
}

fn default_refill() -> f64 {
    BucketConfig::default().refill_per_sec
}

fn default_cooldown_secs() -> u64 {
    BucketConfig::default().default_cooldown.as_secs()
}

impl From<&RateLimitConfig> for BucketConfig {
    fn from(c: &RateLimitConfig) -> Self {
        BucketConfig {
            capacity: c.capacity,
            refill_per_sec: c.refill_per_sec,
            default_cooldown: Duration::from_secs(c.default_cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    RetryPolicy::default().base_delay.as_millis() as u64
}

fn default_max_delay_secs() -> u64 {
    RetryPolicy::default().max_delay.as_secs()
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: c.max_attempts,
            base_delay: Duration::from_millis(c.base_delay_ms),
            max_delay: Duration::from_secs(c.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

/// Token values may be literals or `$VAR` environment references.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CredentialsConfig {
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
}

/// A self-hosted forge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub host: String,
    pub kind: ForgeKind,
    pub api_base: Option<String>,
    pub token: Option<String>,
}

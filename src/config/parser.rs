use std::collections::HashSet;
use std::path::Path;

use crate::errors::HarvestError;
use super::schema::CONFIG_SCHEMA;
use super::types::HarvesterConfig;

const MAX_CONFIG_BYTES: u64 = 1_048_576;

pub async fn parse_config(path: &Path) -> Result<HarvesterConfig, HarvestError> {
    if !path.exists() {
        return Err(HarvestError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(HarvestError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<HarvesterConfig, HarvestError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    // An empty document means "all defaults".
    if yaml.is_null() {
        return Ok(HarvesterConfig::default());
    }

    validate_schema(&yaml)?;

    let config: HarvesterConfig = serde_yaml::from_value(yaml)?;

    validate_conflicts(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), HarvestError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| HarvestError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| HarvestError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        if !messages.is_empty() {
            return Err(HarvestError::Config(messages.join("; ")));
        }
    }

    Ok(())
}

/// Detect semantic conflicts in the parsed configuration.
fn validate_conflicts(config: &HarvesterConfig) -> Result<(), HarvestError> {
    if let Some(hosts) = &config.hosts {
        let mut seen = HashSet::new();
        for h in hosts {
            if !seen.insert(h.host.to_ascii_lowercase()) {
                return Err(HarvestError::Config(format!("Host '{}' is configured more than once", h.host)));
            }
        }
    }

    if let Some(rl) = &config.rate_limit {
        if rl.capacity > 0 && rl.refill_per_sec <= 0.0 {
            return Err(HarvestError::Config(
                "rate_limit.refill_per_sec must be positive when capacity is non-zero".into(),
            ));
        }
    }

    if let Some(retry) = &config.retry {
        if retry.base_delay_ms > retry.max_delay_secs.saturating_mul(1000) {
            return Err(HarvestError::Config(
                "retry.base_delay_ms exceeds retry.max_delay_secs".into(),
            ));
        }
    }

    Ok(())
}

use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "harvest": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "out": { "type": "string", "minLength": 1 },
                    "state": { "type": "string", "minLength": 1 },
                    "concurrency": { "type": "integer", "minimum": 1, "maximum": 256 },
                    "max_blob_bytes": { "type": "integer", "minimum": 1 },
                    "since": { "type": "integer", "minimum": 1988, "maximum": 2999 }
                }
            },
            "rate_limit": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "capacity": { "type": "integer", "minimum": 0 },
                    "refill_per_sec": { "type": "number", "minimum": 0 },
                    "default_cooldown_secs": { "type": "integer", "minimum": 1, "maximum": 86400 }
                }
            },
            "retry": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "max_attempts": { "type": "integer", "minimum": 1, "maximum": 20 },
                    "base_delay_ms": { "type": "integer", "minimum": 0 },
                    "max_delay_secs": { "type": "integer", "minimum": 0 }
                }
            },
            "http": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "user_agent": { "type": "string", "minLength": 1 }
                }
            },
            "credentials": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "github_token": { "type": "string" },
                    "gitlab_token": { "type": "string" }
                }
            },
            "hosts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["host", "kind"],
                    "properties": {
                        "host": { "type": "string", "minLength": 1 },
                        "kind": { "type": "string", "enum": ["github", "gitlab"] },
                        "api_base": { "type": "string", "pattern": "^https?://" },
                        "token": { "type": "string" }
                    }
                }
            }
        }
    })
});

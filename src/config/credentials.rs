use tracing::{debug, warn};

/// Resolve a credential value. A value starting with '$' is an environment
/// variable reference; an unset variable yields no credential.
pub fn resolve_credential(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.strip_prefix('$') {
        Some(var_name) => match std::env::var(var_name) {
            Ok(resolved) if !resolved.is_empty() => {
                debug!(var = %var_name, "Resolved credential from environment");
                Some(resolved)
            }
            _ => {
                warn!(var = %var_name, "Credential environment variable not set");
                None
            }
        },
        None => Some(value.to_string()),
    }
}

/// Configured value if it resolves, else the conventional environment variable.
pub fn token_or_env(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .and_then(resolve_credential)
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
}

/// Redact sensitive values in a string. Replaces known credential values
/// with [REDACTED].
pub fn redact_credentials(text: &str, secrets: &[&str]) -> String {
    let mut result = text.to_string();
    for secret in secrets {
        if !secret.is_empty() && secret.len() >= 4 {
            result = result.replace(secret, "[REDACTED]");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_credential_literal() {
        assert_eq!(resolve_credential("ghp_literal").as_deref(), Some("ghp_literal"));
        assert_eq!(resolve_credential("  "), None);
    }

    #[test]
    fn test_resolve_credential_env_var() {
        std::env::set_var("TEST_CVEFIX_CRED", "secret123");
        assert_eq!(resolve_credential("$TEST_CVEFIX_CRED").as_deref(), Some("secret123"));
        std::env::remove_var("TEST_CVEFIX_CRED");
    }

    #[test]
    fn test_resolve_credential_missing_env_var() {
        assert_eq!(resolve_credential("$NONEXISTENT_CVEFIX_VAR"), None);
    }

    #[test]
    fn test_token_falls_back_to_env() {
        std::env::set_var("TEST_CVEFIX_FALLBACK", "from-env");
        assert_eq!(token_or_env(None, "TEST_CVEFIX_FALLBACK").as_deref(), Some("from-env"));
        assert_eq!(token_or_env(Some("explicit"), "TEST_CVEFIX_FALLBACK").as_deref(), Some("explicit"));
        std::env::remove_var("TEST_CVEFIX_FALLBACK");
    }

    #[test]
    fn test_redact_credentials() {
        let text = "GET /repos with token ghp_S3cret123 and key=abc";
        let redacted = redact_credentials(text, &["ghp_S3cret123", "abc"]);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("ghp_S3cret123"));
        // too short to redact
        assert!(redacted.contains("key=abc"));
    }
}

//! Environment-sourced defaults
//!
//! Explicit options always win over the environment, which wins over the
//! built-in defaults below.

use std::env;

/// Provider used when none is named.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Overrides [`DEFAULT_PROVIDER`].
pub const PROVIDER_ENV: &str = "AI_FILTER_PROVIDER";

/// Default sampling temperature (low for deterministic extraction).
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Default response token budget.
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Default timeout for API requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Read an environment variable, treating empty values as unset
pub fn env_value(name: &str) -> Option<String> {
    non_empty(env::var(name).ok())
}

/// Drop empty strings
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Pick the explicit value, then the environment value
pub fn resolve(explicit: Option<&str>, from_env: Option<String>) -> Option<String> {
    non_empty(explicit.map(str::to_string)).or_else(|| non_empty(from_env))
}

/// Provider name: explicit, then `AI_FILTER_PROVIDER`, then `openai`
pub fn provider_name(explicit: Option<&str>) -> String {
    resolve(explicit, env_value(PROVIDER_ENV)).unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_wins() {
        assert_eq!(
            resolve(Some("key-1"), Some("key-2".to_string())),
            Some("key-1".to_string())
        );
    }

    #[test]
    fn test_empty_explicit_falls_back() {
        assert_eq!(
            resolve(Some(""), Some("from-env".to_string())),
            Some("from-env".to_string())
        );
        assert_eq!(resolve(None, Some("  ".to_string())), None);
        assert_eq!(resolve(None, None), None);
    }

    #[test]
    fn test_provider_name_explicit() {
        assert_eq!(provider_name(Some("claude")), "claude");
    }
}

//! Configuration errors, duration parsing and `${VAR}` expansion.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Why a configuration file or backend description was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read from disk.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// The YAML document is malformed or does not match the schema.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A field is missing, blank or out of range; raised before any
    /// connection is attempted.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a human-readable duration such as `500ms`, `2s` or `1m30s`.
///
/// Used as a `clap` value parser for duration overrides.
///
/// ```
/// use asyncdb::config::parse_duration;
///
/// assert_eq!(parse_duration("500ms").unwrap().as_millis(), 500);
/// assert_eq!(parse_duration("1m30s").unwrap().as_secs(), 90);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// `${NAME}` or `${NAME:-fallback}`.
static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<fallback>[^}]*))?\}")
        .expect("env reference pattern is valid")
});

/// Substitute environment references in configuration text.
///
/// Follows shell `:-` semantics: the fallback applies when the variable is
/// unset or empty. Without a fallback such references expand to nothing.
pub fn expand_env_vars(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures| {
            resolve_reference(&caps["name"], caps.name("fallback").map(|m| m.as_str()))
        })
        .into_owned()
}

fn resolve_reference(name: &str, fallback: Option<&str>) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration(" 2s ").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("30").is_err());
    }

    #[test]
    fn test_expand_env_vars_untouched() {
        assert_eq!(
            expand_env_vars("SELECT '$1', $2 FROM t"),
            "SELECT '$1', $2 FROM t"
        );
    }

    #[test]
    fn test_expand_env_vars_default() {
        assert_eq!(
            expand_env_vars("host: ${ASYNCDB_TEST_UNSET_HOST:-localhost}"),
            "host: localhost"
        );
        assert_eq!(expand_env_vars("password: ${ASYNCDB_TEST_UNSET_PW}"), "password: ");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: test-specific variable, not read by any other test.
        unsafe {
            std::env::set_var("ASYNCDB_TEST_EXPAND_PW", "s3cret");
        }
        assert_eq!(
            expand_env_vars("password: ${ASYNCDB_TEST_EXPAND_PW:-none}"),
            "password: s3cret"
        );
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("ASYNCDB_TEST_EXPAND_PW");
        }
    }

    #[test]
    fn test_expand_env_vars_empty_uses_fallback() {
        // SAFETY: test-specific variable, not read by any other test.
        unsafe {
            std::env::set_var("ASYNCDB_TEST_EMPTY_HOST", "");
        }
        assert_eq!(
            expand_env_vars("host: ${ASYNCDB_TEST_EMPTY_HOST:-db.local}, port: ${ASYNCDB_TEST_EMPTY_HOST}"),
            "host: db.local, port: "
        );
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("ASYNCDB_TEST_EMPTY_HOST");
        }
    }
}

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::types::{ExecutionMode, PassCriterion};

/// Assertions kept per test batch unless configured otherwise
pub const DEFAULT_LIMIT: usize = 5;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Budget per execution (whole statement list in shared mode)
    pub timeout_ms: u64,
    /// Max assertions kept per originating test batch; `None` keeps all
    pub limit: Option<usize>,
    /// Max concurrent executions / generations
    pub pool_size: usize,
    /// Generation attempts per unit
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Swap real engine and generator for deterministic stubs
    pub debug: bool,
    pub python: String,
    pub mode: ExecutionMode,
    pub pass_criterion: PassCriterion,
    pub tgi_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            timeout_ms: parse_value(lookup("VERDICT_TIMEOUT_MS")).unwrap_or(3000),
            limit: lookup("VERDICT_LIMIT")
                .and_then(|v| parse_limit(&v).ok())
                .unwrap_or(Some(DEFAULT_LIMIT)),
            pool_size: parse_value(lookup("VERDICT_POOL_SIZE")).unwrap_or(8),
            retries: parse_value(lookup("VERDICT_RETRIES")).unwrap_or(10),
            retry_delay_ms: parse_value(lookup("VERDICT_RETRY_DELAY_MS")).unwrap_or(1000),
            debug: lookup("VERDICT_DEBUG")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            python: lookup("VERDICT_PYTHON").unwrap_or_else(|| "python3".to_string()),
            mode: lookup("VERDICT_MODE")
                .and_then(|v| ExecutionMode::parse(&v))
                .unwrap_or_default(),
            pass_criterion: lookup("VERDICT_PASS_CRITERION")
                .and_then(|v| PassCriterion::parse(&v))
                .unwrap_or_default(),
            tgi_url: lookup("VERDICT_TGI_URL").filter(|v| !v.is_empty()),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_value<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

/// `0`, `none` and `all` disable the per-batch cap
pub fn parse_limit(value: &str) -> Result<Option<usize>> {
    match value.trim().to_lowercase().as_str() {
        "" | "0" | "none" | "all" => Ok(None),
        other => match other.parse() {
            Ok(limit) => Ok(Some(limit)),
            Err(_) => bail!(
                "Invalid limit: {} (expected a positive number, 0, none or all)",
                value
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(|_| None);
        assert_eq!(config.timeout_ms, 3000);
        assert_eq!(config.limit, Some(5));
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.retries, 10);
        assert_eq!(config.mode, ExecutionMode::Shared);
        assert_eq!(config.pass_criterion, PassCriterion::Completed);
        assert!(!config.debug);
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit("2").unwrap(), Some(2));
        assert_eq!(parse_limit(" 10 ").unwrap(), Some(10));
        assert_eq!(parse_limit("0").unwrap(), None);
        assert_eq!(parse_limit("none").unwrap(), None);
        assert_eq!(parse_limit("ALL").unwrap(), None);
    }

    #[test]
    fn test_parse_limit_rejects_garbage() {
        assert!(parse_limit("-1").is_err());
        assert!(parse_limit("2x").is_err());
        assert!(parse_limit("many").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_vars(vars(&[
            ("VERDICT_LIMIT", "all"),
            ("VERDICT_POOL_SIZE", "3"),
            ("VERDICT_MODE", "isolated"),
            ("VERDICT_TGI_URL", ""),
        ]));
        assert_eq!(config.limit, None);
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.mode, ExecutionMode::Isolated);
        assert_eq!(config.tgi_url, None);
    }

    #[test]
    fn test_invalid_env_limit_keeps_default_cap() {
        let config = Config::from_vars(vars(&[("VERDICT_LIMIT", "-1")]));
        assert_eq!(config.limit, Some(DEFAULT_LIMIT));
    }

    #[test]
    fn test_durations() {
        let config = Config {
            timeout_ms: 1500,
            retry_delay_ms: 250,
            ..Config::from_vars(|_| None)
        };
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
    }
}

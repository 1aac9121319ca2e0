//! Environment configuration for the pipeline run.
//!
//! Configuration is environment-first: each value reads its variable and
//! falls back to a built-in default. The two values without a sensible
//! default (the scoring credential and the conversion type id) are fatal
//! when absent, before any store or network I/O happens.

use crate::scoring::{DEFAULT_API_URL, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of conversions per scoring request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Resolved run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scoring service credential (`IHC_API_KEY`, required).
    pub api_key: String,
    /// Scoring service base URL (`IHC_API_URL`).
    pub api_url: String,
    /// Conversion type identifier (`IHC_CONV_TYPE_ID`, required).
    pub conv_type_id: String,
    /// Conversions per scoring request (`BATCH_SIZE`).
    pub batch_size: usize,
    /// SQLite database location (`DB_PATH`).
    pub db_path: PathBuf,
    /// Report destination (`CSV_FILE`).
    pub output_path: PathBuf,
    /// Attempts per scoring request (`IHC_MAX_RETRIES`).
    pub max_attempts: u32,
    /// Fixed delay between attempts (`IHC_RETRY_DELAY_MS`).
    pub retry_delay: Duration,
}

/// Fatal pre-flight configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    MissingApiKey,
    MissingConvTypeId,
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingApiKey => {
                write!(f, "scoring API key not found, set IHC_API_KEY in the environment")
            }
            ConfigError::MissingConvTypeId => write!(
                f,
                "conversion type id not found, set IHC_CONV_TYPE_ID in the environment"
            ),
            ConfigError::Invalid { var, value } => {
                write!(f, "invalid value {value:?} for {var}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an injected lookup. The seam `from_env`
    /// and the tests share.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = get("IHC_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let conv_type_id = get("IHC_CONV_TYPE_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingConvTypeId)?;

        let api_url = get("IHC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let batch_size = parse_or("BATCH_SIZE", &get, DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "BATCH_SIZE",
                value: "0".to_string(),
            });
        }

        let db_path = get("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("challenge.db"));
        let output_path = get("CSV_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output/channel_metrics.csv"));

        let max_attempts = parse_or("IHC_MAX_RETRIES", &get, DEFAULT_MAX_ATTEMPTS)?;
        let retry_delay_ms: u64 = parse_or(
            "IHC_RETRY_DELAY_MS",
            &get,
            DEFAULT_RETRY_DELAY.as_millis() as u64,
        )?;

        Ok(Self {
            api_key,
            api_url,
            conv_type_id,
            batch_size,
            db_path,
            output_path,
            max_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &'static str,
    get: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = Config::from_lookup(env(&[
            ("IHC_API_KEY", "secret"),
            ("IHC_CONV_TYPE_ID", "conv_1"),
        ]))
        .expect("config");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.db_path, PathBuf::from("challenge.db"));
        assert_eq!(config.output_path, PathBuf::from("output/channel_metrics.csv"));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = Config::from_lookup(env(&[("IHC_CONV_TYPE_ID", "conv_1")]))
            .err()
            .expect("must fail");
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn blank_conv_type_id_is_fatal() {
        let err = Config::from_lookup(env(&[
            ("IHC_API_KEY", "secret"),
            ("IHC_CONV_TYPE_ID", "  "),
        ]))
        .err()
        .expect("must fail");
        assert!(matches!(err, ConfigError::MissingConvTypeId));
    }

    #[test]
    fn overrides_take_effect() {
        let config = Config::from_lookup(env(&[
            ("IHC_API_KEY", "secret"),
            ("IHC_CONV_TYPE_ID", "conv_1"),
            ("BATCH_SIZE", "25"),
            ("DB_PATH", "/tmp/attribution.db"),
            ("IHC_MAX_RETRIES", "5"),
            ("IHC_RETRY_DELAY_MS", "250"),
        ]))
        .expect("config");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.db_path, PathBuf::from("/tmp/attribution.db"));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn unparseable_batch_size_is_rejected() {
        let err = Config::from_lookup(env(&[
            ("IHC_API_KEY", "secret"),
            ("IHC_CONV_TYPE_ID", "conv_1"),
            ("BATCH_SIZE", "many"),
        ]))
        .err()
        .expect("must fail");
        assert!(matches!(err, ConfigError::Invalid { var: "BATCH_SIZE", .. }));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Config::from_lookup(env(&[
            ("IHC_API_KEY", "secret"),
            ("IHC_CONV_TYPE_ID", "conv_1"),
            ("BATCH_SIZE", "0"),
        ]))
        .err()
        .expect("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}

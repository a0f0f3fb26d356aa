//! Service configuration read from environment variables.

use crate::db::pool::PoolSettings;
use crate::services::retry::RetryPolicy;
use crate::services::reviewer_store::StoreConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    /// Deadline given to each inbound request.
    pub request_timeout: Duration,
    pub store: StoreConfig,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_host = get("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let http_port: u16 = parse_or(&get, "HTTP_PORT", 8080)?;
        let request_timeout = millis_or(&get, "HTTP_TIMEOUT_MS", 5000)?;

        let db_path = get("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("reviewer-service.db"));
        let store_timeout = millis_or(&get, "DB_TIMEOUT_MS", 3000)?;
        let max_retries: u32 = parse_or(&get, "DB_MAX_RETRIES", 3)?;
        let base_backoff = millis_or(&get, "DB_BASE_BACKOFF_MS", 50)?;
        let max_connections: u32 = parse_or(&get, "DB_MAX_CONNECTIONS", 5)?;
        let min_connections: u32 = parse_or(&get, "DB_MIN_CONNECTIONS", 1)?;
        let seed = get("REVIEWER_SEED")
            .map(|v| parse_value::<u64>("REVIEWER_SEED", &v))
            .transpose()?;

        if max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "0", "must be at least 1"));
        }
        if min_connections > max_connections {
            return Err(invalid(
                "DB_MIN_CONNECTIONS",
                &min_connections.to_string(),
                "must not exceed DB_MAX_CONNECTIONS",
            ));
        }

        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Config {
            http_host,
            http_port,
            request_timeout,
            store: StoreConfig {
                db_path,
                pool: PoolSettings {
                    max_connections,
                    min_connections,
                    acquire_timeout: store_timeout,
                },
                timeout: store_timeout,
                retry: RetryPolicy::new(max_retries, base_backoff),
                seed,
            },
            log_level,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &str, default_ms: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default_ms).map(Duration::from_millis)
}

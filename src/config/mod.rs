//! Gateway configuration.
//!
//! Loaded from environment variables, with a `.env` file picked up first if
//! one is present.

use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::gateway::GatewaySettings;
use crate::upstream::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, UpstreamConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub gateway: GatewaySettings,
    pub upstream: UpstreamConfig,

    /// `None` disables the balance cache.
    pub cache: Option<CacheConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            gateway: GatewaySettings::default(),
            upstream: UpstreamConfig::default(),
            cache: Some(CacheConfig::default()),
        }
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source. Unset or blank
    /// variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = Self::default();

        let timeout_secs = parse_u64(
            "VIRTUSIM_TIMEOUT_SECS",
            var("VIRTUSIM_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT.as_secs(),
        )?;
        let upstream = UpstreamConfig {
            base_url: var("VIRTUSIM_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        };

        let cache_enabled = parse_bool("BALANCE_CACHE_ENABLED", var("BALANCE_CACHE_ENABLED"), true)?;
        let cache = if cache_enabled {
            let ttl_secs = parse_u64(
                "BALANCE_CACHE_TTL_SECS",
                var("BALANCE_CACHE_TTL_SECS"),
                DEFAULT_TTL.as_secs(),
            )?;
            let max_entries = parse_u64(
                "BALANCE_CACHE_MAX_ENTRIES",
                var("BALANCE_CACHE_MAX_ENTRIES"),
                DEFAULT_MAX_ENTRIES as u64,
            )?;
            let max_entries = usize::try_from(max_entries)
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or_else(|| ConfigError::Invalid {
                    var: "BALANCE_CACHE_MAX_ENTRIES",
                    expected: "a positive integer",
                    value: max_entries.to_string(),
                })?;
            Some(CacheConfig {
                ttl: Duration::from_secs(ttl_secs),
                max_entries,
            })
        } else {
            None
        };

        Ok(Self {
            bind_addr: var("GATEWAY_BIND").unwrap_or(defaults.bind_addr),
            gateway: GatewaySettings {
                public_url: var("GATEWAY_PUBLIC_URL").unwrap_or(defaults.gateway.public_url),
                server_name: var("GATEWAY_SERVER_NAME").unwrap_or(defaults.gateway.server_name),
            },
            upstream,
            cache,
        })
    }
}

fn parse_u64(var: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            expected: "a non-negative integer",
            value,
        }),
    }
}

fn parse_bool(var: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            expected: "a boolean",
            value,
        }),
    }
}

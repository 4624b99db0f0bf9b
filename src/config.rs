//! Configuration Module
//!
//! Handles loading cache, retry and server settings from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{EvictionPolicy, StoreConfig, DEFAULT_NAMESPACE};
use crate::error::Retryable;
use crate::network::RetryPolicy;

/// Runtime configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Prefix for keys written to the backing store
    pub namespace: String,
    /// Maximum number of entries in the memory tier
    pub max_size: usize,
    /// Default TTL in milliseconds, 0 = no expiry
    pub default_ttl_ms: u64,
    pub eviction: EvictionPolicy,
    /// File used by the JSON backing store
    pub store_path: PathBuf,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Default width for batch loads
    pub concurrency: usize,
    /// Sweep interval in seconds, 0 = disabled
    pub sweep_interval_secs: u64,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAMESPACE` - Backing-store key prefix (default: "cache:")
    /// - `CACHE_MAX_SIZE` - Memory-tier entry cap (default: 1000)
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL, 0 = none (default: 0)
    /// - `CACHE_EVICTION` - "fifo" or "lru" (default: fifo)
    /// - `CACHE_STORE_PATH` - Backing store file (default: cache-store.json)
    /// - `RETRY_MAX_RETRIES` - (default: 3)
    /// - `RETRY_BASE_DELAY_MS` - (default: 100)
    /// - `RETRY_MAX_DELAY_MS` - (default: 5000)
    /// - `BATCH_CONCURRENCY` - (default: 4)
    /// - `SWEEP_INTERVAL_SECS` - (default: 30)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("CACHE_NAMESPACE").unwrap_or(defaults.namespace),
            max_size: parse_var("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            default_ttl_ms: parse_var("CACHE_DEFAULT_TTL_MS").unwrap_or(defaults.default_ttl_ms),
            eviction: parse_var("CACHE_EVICTION").unwrap_or(defaults.eviction),
            store_path: env::var("CACHE_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            max_retries: parse_var("RETRY_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_delay_ms: parse_var("RETRY_BASE_DELAY_MS").unwrap_or(defaults.base_delay_ms),
            max_delay_ms: parse_var("RETRY_MAX_DELAY_MS").unwrap_or(defaults.max_delay_ms),
            concurrency: parse_var("BATCH_CONCURRENCY").unwrap_or(defaults.concurrency),
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval_secs),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            namespace: self.namespace.clone(),
            max_size: self.max_size,
            default_ttl: match self.default_ttl_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            eviction: self.eviction,
        }
    }

    pub fn retry_policy<E: Retryable + 'static>(&self) -> RetryPolicy<E> {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_size: 1000,
            default_ttl_ms: 0,
            eviction: EvictionPolicy::Fifo,
            store_path: PathBuf::from("cache-store.json"),
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            concurrency: 4,
            sweep_interval_secs: 30,
            server_port: 3000,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

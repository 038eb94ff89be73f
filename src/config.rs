//! Runtime configuration (SPEC_FULL ambient-stack addition).
//!
//! Grounded on `titio72-rust_nmea_router`'s `config.rs`: nested sub-configs,
//! each with `impl Default`, loaded from a JSON file via
//! `serde_json::from_str`, with secrets (bearer tokens, API keys) layered in
//! from environment variables afterward rather than committed to the file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FleetwatchError;
use crate::source::SourceConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub vessel: VesselConfig,
    #[serde(default)]
    pub watchlist: WatchlistConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            dedup: DedupConfig::default(),
            vessel: VesselConfig::default(),
            watchlist: WatchlistConfig::default(),
            fanout: FanoutConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_secs: u64,
    pub ttl_multiplier: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            ttl_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VesselConfig {
    pub expire_after_secs: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for VesselConfig {
    fn default() -> Self {
        Self {
            expire_after_secs: 86_400,
            cleanup_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchlistConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub auth_type: WatchlistAuthType,
    /// Name of the environment variable holding the secret, never the
    /// secret itself (spec §6, §7 fail-fast-at-startup).
    pub auth_secret_env: Option<String>,
    pub sync_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            auth_type: WatchlistAuthType::None,
            auth_secret_env: None,
            sync_interval_secs: 300,
            request_timeout_secs: 10,
        }
    }
}

impl WatchlistConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistAuthType {
    #[default]
    None,
    Bearer,
    ApiKey,
    Basic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub max_connections_per_ip: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_events: u32,
    pub pool_capacity: usize,
    pub bind_addr: String,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 10,
            rate_limit_window_secs: 60,
            rate_limit_max_events: 120,
            pool_capacity: 10_000,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
    pub json: bool,
    pub file_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,fleetwatch=debug".to_string(),
            json: false,
            file_dir: None,
        }
    }
}

impl Config {
    /// Loads from a JSON file and fails fast on a malformed document (spec
    /// §7: configuration errors halt startup rather than degrade).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FleetwatchError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| FleetwatchError::Configuration(format!("reading {}: {e}", path.as_ref().display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| FleetwatchError::Configuration(format!("parsing {}: {e}", path.as_ref().display())))
    }

    /// Resolves the watchlist auth secret from the environment variable
    /// named in config, if one is configured (spec §6: secrets never live
    /// in the config file).
    pub fn watchlist_auth_secret(&self) -> Option<String> {
        self.watchlist
            .auth_secret_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

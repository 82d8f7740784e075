//! Environment-based configuration.
//!
//! # Environment Variables
//!
//! - `COMMIT_MEMORY_DATA_DIR` — data directory holding the identity
//!   key file and the SQLite database (default: `./data`).
//! - `COMMIT_MEMORY_NETWORK` — `mainnet`, `testnet`, or `regtest`
//!   (default: `testnet`); selects the default block-explorer base URL.
//! - `COMMIT_MEMORY_EXPLORER_URL` — overrides the network default.
//! - `COMMIT_MEMORY_RATE_LIMIT_MAX` — requests per rolling window
//!   (default: 60).
//! - `COMMIT_MEMORY_RATE_LIMIT_WINDOW_SECS` — window length in seconds
//!   (default: 60).
//! - `COMMIT_MEMORY_RATE_LIMIT_BURST` — burst allowance (default: 10).
//! - `COMMIT_MEMORY_LOG_LEVEL` — `trace`/`debug`/`info`/`warn`/`error`
//!   (default: `info`).
//! - `COMMIT_MEMORY_LOG_FORMAT` — `pretty` or `json` (default: `pretty`,
//!   `json` on `mainnet`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::anchor::{ESPLORA_MAINNET_URL, ESPLORA_TESTNET_URL};
use crate::proof::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {detail}")]
    InvalidValue { var: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ConfigError::InvalidValue {
                var: "COMMIT_MEMORY_NETWORK".to_string(),
                detail: format!("unknown network: {other}"),
            }),
        }
    }
}

impl Network {
    pub fn default_explorer_url(&self) -> &'static str {
        match self {
            Network::Mainnet => ESPLORA_MAINNET_URL,
            Network::Testnet | Network::Regtest => ESPLORA_TESTNET_URL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub network: Network,
    pub explorer_url: String,
    pub rate_limit: RateLimitConfig,
    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("COMMIT_MEMORY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let network: Network = env::var("COMMIT_MEMORY_NETWORK")
            .unwrap_or_else(|_| "testnet".to_string())
            .parse()?;

        let explorer_url = env::var("COMMIT_MEMORY_EXPLORER_URL")
            .unwrap_or_else(|_| network.default_explorer_url().to_string());

        let max_requests = parse_env_or(
            "COMMIT_MEMORY_RATE_LIMIT_MAX",
            RateLimitConfig::default().max_requests,
        )?;
        let window_secs = parse_env_or(
            "COMMIT_MEMORY_RATE_LIMIT_WINDOW_SECS",
            RateLimitConfig::default().window.as_secs(),
        )?;
        let burst = parse_env_or("COMMIT_MEMORY_RATE_LIMIT_BURST", RateLimitConfig::default().burst)?;

        let log_level = env::var("COMMIT_MEMORY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = match env::var("COMMIT_MEMORY_LOG_FORMAT") {
            Ok(v) => v.eq_ignore_ascii_case("json"),
            Err(_) => network == Network::Mainnet,
        };

        Ok(Self {
            data_dir,
            network,
            explorer_url,
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
                burst,
            },
            log_level,
            log_json,
        })
    }
}

fn parse_env_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            detail: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
